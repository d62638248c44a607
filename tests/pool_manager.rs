//! Integration tests for the pool manager: serving, refills, self-healing and
//! persistence across restarts.

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vanity_pool::pool::{
    CandidateSource, DerivationFailure, JsonFileStore, MemoryStore, PoolConfig, PoolConfigBuilder,
    PoolError, PoolManager, PoolManagerBuilder, PoolStatus, RefillPhase, SearchBudget, SearchEngine,
    SourceFactory, VanityPattern,
};
use vanity_pool::types::{Candidate, KeyContext, PoolKey, SecretKey};

/// Brute-force a random key whose address ends in `suffix`.
fn matching_address(suffix: &str) -> Pubkey {
    let pattern = VanityPattern::suffix(suffix).unwrap();
    loop {
        let key = Pubkey::new_from_array(rand::random());
        if pattern.matches_address(&key) {
            return key;
        }
    }
}

fn candidate_for(key: PoolKey, address: Pubkey) -> Candidate {
    match key {
        None => Candidate::keypair(address, SecretKey::new(vec![0; 64])),
        Some(context) => Candidate::program_derived(address, 255, rand::random::<[u8; 8]>().to_vec(), context),
    }
}

fn seeded(key: PoolKey, suffix: &str, count: usize) -> Vec<Candidate> {
    (0..count).map(|_| candidate_for(key, matching_address(suffix))).collect()
}

fn context() -> KeyContext {
    KeyContext::new(Pubkey::new_unique(), Pubkey::new_unique())
}

/// Matches on every `every`-th draw while the gate is open; the all-zero
/// address it returns otherwise never matches the test suffixes.
struct ScriptedSource {
    key: PoolKey,
    suffix: String,
    every: u64,
    gate: Arc<AtomicBool>,
    draws: AtomicU64,
}

impl CandidateSource for ScriptedSource {
    fn draw(&self) -> Result<Candidate, DerivationFailure> {
        let n = self.draws.fetch_add(1, Ordering::Relaxed) + 1;
        let address = if self.gate.load(Ordering::SeqCst) && n % self.every == 0 {
            matching_address(&self.suffix)
        } else {
            Pubkey::default()
        };
        Ok(candidate_for(self.key, address))
    }
}

struct ScriptedFactory {
    suffix: String,
    every: u64,
    gate: Arc<AtomicBool>,
}

impl ScriptedFactory {
    fn matching(suffix: &str, every: u64) -> Self {
        Self {
            suffix: suffix.to_string(),
            every,
            gate: Arc::new(AtomicBool::new(true)),
        }
    }

    fn never() -> Self {
        Self {
            suffix: "zz".to_string(),
            every: u64::MAX,
            gate: Arc::new(AtomicBool::new(false)),
        }
    }

    fn gated(suffix: &str, every: u64) -> (Self, Arc<AtomicBool>) {
        let gate = Arc::new(AtomicBool::new(false));
        let factory = Self {
            suffix: suffix.to_string(),
            every,
            gate: gate.clone(),
        };
        (factory, gate)
    }
}

impl SourceFactory for ScriptedFactory {
    fn source_for(&self, key: &PoolKey) -> Result<Arc<dyn CandidateSource>, PoolError> {
        Ok(Arc::new(ScriptedSource {
            key: *key,
            suffix: self.suffix.clone(),
            every: self.every,
            gate: self.gate.clone(),
            draws: AtomicU64::new(0),
        }))
    }
}

fn small_budget(max_attempts: u64) -> SearchBudget {
    SearchBudget {
        max_attempts,
        max_wall_clock_ms: 10_000,
        batch_size: 64,
    }
}

fn derived_config(pattern: &str) -> PoolConfig {
    PoolConfigBuilder::new()
        .program_derived(Pubkey::new_unique(), "")
        .with_pattern(pattern)
        .with_pool_size(10, 3)
        .with_on_demand_retries(0, 0)
        .with_background_budget(small_budget(2_000))
        .with_refill_backoff(20)
        .with_accelerator(false, 0)
        .build()
        .unwrap()
}

async fn start(config: PoolConfig, store: Vec<Candidate>, sources: ScriptedFactory) -> Result<PoolManager> {
    PoolManagerBuilder::new(config)
        .with_store(Arc::new(MemoryStore::with_candidates(store)))
        .with_source_factory(Arc::new(sources))
        .with_engine(SearchEngine::portable())
        .start()
        .await
}

/// Poll until `key` holds at least `size` candidates and no refill is running.
async fn wait_for_full(manager: &PoolManager, key: PoolKey, size: usize) -> Result<PoolStatus> {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let status = manager.pool_status(key).await.unwrap();
            if status.size >= size && status.phase == RefillPhase::Idle {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("pool never reached its target")
}

#[tokio::test]
async fn test_serves_pooled_candidate_then_reports_unavailable_for_empty_context() -> Result<()> {
    let ctx_a = context();
    let ctx_b = context();
    let pooled = seeded(Some(ctx_a), "rft", 3);

    let config = PoolConfig {
        // the attempt ceiling, not the clock, must end this search
        on_demand: SearchBudget {
            max_attempts: 200_000,
            max_wall_clock_ms: 60_000,
            batch_size: 256,
        },
        ..derived_config("rft")
    };
    let manager = start(config, pooled.clone(), ScriptedFactory::never()).await?;

    let served = manager.fetch_candidate(Some(ctx_a)).await?;
    assert_eq!(served, pooled[0]);
    assert!(served.address.to_string().to_lowercase().ends_with("rft"));
    assert_eq!(manager.pool_status(Some(ctx_a)).await?.size, 2);

    match manager.fetch_candidate(Some(ctx_b)).await {
        Err(PoolError::TemporarilyUnavailable { attempts, .. }) => assert_eq!(attempts, 200_000),
        other => panic!("expected TemporarilyUnavailable, got {:?}", other),
    }

    let metrics = manager.metrics();
    assert_eq!(metrics.served_from_pool, 1);
    assert_eq!(metrics.unavailable, 1);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_hit_below_low_water_mark_refills_to_target() -> Result<()> {
    let ctx = context();
    let pooled = seeded(Some(ctx), "rf", 2);
    let (factory, gate) = ScriptedFactory::gated("rf", 5);
    let manager = start(derived_config("rf"), pooled.clone(), factory).await?;

    let served = manager.fetch_candidate(Some(ctx)).await?;
    assert_eq!(served, pooled[0]);

    let status = manager.pool_status(Some(ctx)).await?;
    assert_eq!(status.size, 1);
    assert_ne!(status.phase, RefillPhase::Idle);

    gate.store(true, Ordering::SeqCst);
    let status = wait_for_full(&manager, Some(ctx), 10).await?;
    assert_eq!(status.size, 10);
    assert_eq!(status.addresses.len(), 10);
    assert_eq!(status.addresses[0], pooled[1].address.to_string());
    assert!(status.last_generated_at.is_some());
    assert_eq!(status.metrics.generated, 9);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_hit_at_low_water_mark_schedules_refill() -> Result<()> {
    let ctx = context();
    let manager = start(derived_config("rf"), seeded(Some(ctx), "rf", 4), ScriptedFactory::never()).await?;

    assert_eq!(manager.pool_status(Some(ctx)).await?.phase, RefillPhase::Idle);
    manager.fetch_candidate(Some(ctx)).await?;

    let status = manager.pool_status(Some(ctx)).await?;
    assert_eq!(status.size, 3);
    assert_ne!(status.phase, RefillPhase::Idle);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_miss_searches_on_demand_and_refills() -> Result<()> {
    let ctx = context();
    let manager = start(derived_config("rf"), Vec::new(), ScriptedFactory::matching("rf", 5)).await?;

    let served = manager.fetch_candidate(Some(ctx)).await?;
    assert!(VanityPattern::suffix("rf")?.matches_address(&served.address));
    assert_eq!(served.key(), Some(ctx));
    assert_eq!(manager.metrics().served_on_demand, 1);

    let status = wait_for_full(&manager, Some(ctx), 10).await?;
    assert_eq!(status.size, 10);
    assert!(!status.addresses.contains(&served.address.to_string()));

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_request_refill_is_idempotent() -> Result<()> {
    let ctx = context();
    let manager = start(derived_config("rf"), Vec::new(), ScriptedFactory::never()).await?;

    let first = manager.request_refill(Some(ctx)).await?;
    assert!(first.started);
    assert_eq!(first.phase, RefillPhase::Scheduled);

    let second = manager.request_refill(Some(ctx)).await?;
    assert!(!second.started);
    assert_ne!(second.phase, RefillPhase::Idle);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_never_serve_a_candidate_twice() -> Result<()> {
    let ctx = context();
    let config = PoolConfig {
        on_demand: small_budget(500),
        ..derived_config("rf")
    };
    let config = PoolConfig {
        target_size: 30,
        ..config
    };
    let manager = start(config, seeded(Some(ctx), "rf", 20), ScriptedFactory::never()).await?;

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.fetch_candidate(Some(ctx)).await })
        })
        .collect();

    let mut served = HashSet::new();
    let mut unavailable = 0;
    for handle in handles {
        match handle.await? {
            Ok(candidate) => assert!(served.insert(candidate.address), "served twice"),
            Err(PoolError::TemporarilyUnavailable { .. }) => unavailable += 1,
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(served.len(), 20);
    assert_eq!(unavailable, 20);
    assert_eq!(manager.pool_status(Some(ctx)).await?.serving, 0);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_refills_back_off_instead_of_spinning() -> Result<()> {
    let ctx = context();
    let config = PoolConfig {
        background: small_budget(500),
        refill_backoff_ms: 5_000,
        ..derived_config("rf")
    };
    let manager = start(config, Vec::new(), ScriptedFactory::never()).await?;

    manager.request_refill(Some(ctx)).await?;
    tokio::time::sleep(Duration::from_secs(60)).await;

    // one failed search per backoff period
    let failures = manager.metrics().refill_failures;
    assert!((11..=14).contains(&failures), "{} refill failures in 60s", failures);
    assert_eq!(manager.pool_status(Some(ctx)).await?.size, 0);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_startup_health_check_fills_keypair_pool() -> Result<()> {
    let config = PoolConfig {
        mode: vanity_pool::pool::PoolMode::Keypair,
        ..derived_config("rf")
    };
    let manager = start(config, Vec::new(), ScriptedFactory::matching("rf", 3)).await?;

    // nobody asked; the startup sweep refills the unkeyed pool on its own
    let status = wait_for_full(&manager, None, 10).await?;
    assert_eq!(status.size, 10);
    assert_eq!(manager.run_health_check().await, 0);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_startup_health_check_heals_loaded_contexts() -> Result<()> {
    let low = context();
    let healthy = context();
    let mut pooled = seeded(Some(low), "rf", 1);
    pooled.extend(seeded(Some(healthy), "rf", 5));

    let manager = start(derived_config("rf"), pooled, ScriptedFactory::matching("rf", 3)).await?;

    let status = wait_for_full(&manager, Some(low), 10).await?;
    assert_eq!(status.size, 10);
    assert_eq!(manager.pool_status(Some(healthy)).await?.size, 5);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_status_without_context_covers_whole_keyed_pool() -> Result<()> {
    let busy = context();
    let quiet = context();
    let mut pooled = seeded(Some(busy), "rf", 4);
    pooled.extend(seeded(Some(quiet), "rf", 5));

    let manager = start(derived_config("rf"), pooled.clone(), ScriptedFactory::never()).await?;

    let whole = manager.pool_status(None).await?;
    assert_eq!(whole.key, None);
    assert_eq!(whole.size, 9);
    let expected: Vec<String> = pooled.iter().map(|c| c.address.to_string()).collect();
    assert_eq!(whole.addresses, expected);
    assert_eq!(whole.phase, RefillPhase::Idle);

    // draining one context to the low water mark starts a refill that never finishes
    manager.fetch_candidate(Some(busy)).await?;
    let whole = manager.pool_status(None).await?;
    assert_eq!(whole.size, 8);
    assert_ne!(whole.phase, RefillPhase::Idle);
    assert_eq!(manager.pool_status(Some(quiet)).await?.phase, RefillPhase::Idle);
    assert_eq!(manager.pool_status(Some(busy)).await?.size, 3);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_key_must_fit_mode() -> Result<()> {
    let derived = start(derived_config("rf"), Vec::new(), ScriptedFactory::never()).await?;
    assert_eq!(derived.fetch_candidate(None).await.err(), Some(PoolError::ContextRequired));
    assert_eq!(derived.request_refill(None).await.err(), Some(PoolError::ContextRequired));
    derived.shutdown().await;

    let config = PoolConfig {
        mode: vanity_pool::pool::PoolMode::Keypair,
        ..derived_config("rf")
    };
    let keypair = start(config, Vec::new(), ScriptedFactory::never()).await?;
    assert_eq!(
        keypair.fetch_candidate(Some(context())).await.err(),
        Some(PoolError::ContextNotAllowed)
    );
    assert_eq!(
        keypair.request_refill(Some(context())).await.err(),
        Some(PoolError::ContextNotAllowed)
    );
    keypair.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_pool_survives_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ctx = context();
    let config = PoolConfig {
        pool_file: dir.path().join("pool.json"),
        target_size: 4,
        low_water_mark: 1,
        ..derived_config("rf")
    };

    let first = PoolManagerBuilder::new(config.clone())
        .with_source_factory(Arc::new(ScriptedFactory::matching("rf", 3)))
        .with_engine(SearchEngine::portable())
        .start()
        .await?;
    first.request_refill(Some(ctx)).await?;
    let before = wait_for_full(&first, Some(ctx), 4).await?;
    first.shutdown().await;

    let second = PoolManagerBuilder::new(config.clone())
        .with_store(Arc::new(JsonFileStore::new(&config.pool_file)))
        .with_source_factory(Arc::new(ScriptedFactory::never()))
        .with_engine(SearchEngine::portable())
        .start()
        .await?;

    let after = second.pool_status(Some(ctx)).await?;
    assert_eq!(after.size, 4);
    assert_eq!(after.addresses, before.addresses);

    let served = second.fetch_candidate(Some(ctx)).await?;
    assert_eq!(served.address.to_string(), before.addresses[0]);

    second.shutdown().await;
    Ok(())
}
