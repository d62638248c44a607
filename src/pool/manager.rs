//! Pool manager: serves candidates, schedules background refills and keeps
//! every partition topped up.
//!
//! Each [`PoolKey`] moves through `Idle -> Scheduled -> Refilling -> Idle`
//! while consumer requests are counted independently, so a partition can be
//! serving and refilling at the same time. At most one refill task exists per
//! key; a process-wide semaphore bounds how many of them search at once.

use crate::pool::config::PoolConfig;
use crate::pool::deriver::{CandidateSource, ModeSourceFactory, SourceFactory};
use crate::pool::engine::SearchEngine;
use crate::pool::error::PoolError;
use crate::pool::matcher::VanityPattern;
use crate::pool::metrics::{MetricsSnapshot, PoolMetrics};
use crate::pool::persistent::PersistentPool;
use crate::pool::search::Searcher;
use crate::pool::storage::{JsonFileStore, PoolStore};
use crate::pool::types::{ExhaustReason, PoolStatus, RefillAck, RefillPhase, SearchOutcome};
use crate::types::{Candidate, KeyLabel, PoolKey};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, error, info, instrument, warn};

/// Handle to a running pool. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct PoolManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: PoolConfig,
    pattern: VanityPattern,
    engine: SearchEngine,
    sources: Arc<dyn SourceFactory>,
    pool: Mutex<PersistentPool>,
    contexts: Mutex<HashMap<PoolKey, ContextState>>,
    refill_permits: Semaphore,
    metrics: PoolMetrics,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct ContextState {
    phase: RefillPhase,
    serving: Arc<AtomicUsize>,
    last_generated_at: Option<DateTime<Utc>>,
    task: Option<JoinHandle<()>>,
}

/// Decrements the serving counter when a request finishes, however it ends.
struct ServingGuard(Arc<AtomicUsize>);

impl Drop for ServingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for [`PoolManager`] with sensible defaults.
pub struct PoolManagerBuilder {
    config: PoolConfig,
    store: Option<Arc<dyn PoolStore>>,
    sources: Option<Arc<dyn SourceFactory>>,
    engine: Option<SearchEngine>,
}

impl PoolManagerBuilder {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            store: None,
            sources: None,
            engine: None,
        }
    }

    /// Use a custom store instead of the configured pool file.
    pub fn with_store(mut self, store: Arc<dyn PoolStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom candidate source factory instead of the configured mode.
    pub fn with_source_factory(mut self, sources: Arc<dyn SourceFactory>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Skip accelerator detection and use this engine.
    pub fn with_engine(mut self, engine: SearchEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Validate the config, load the pool and start the health check.
    pub async fn start(self) -> Result<PoolManager> {
        let config = self.config;
        config.validate().context("Invalid pool configuration")?;
        let pattern = config.vanity_pattern()?;

        let store: Arc<dyn PoolStore> = match self.store {
            Some(store) => store,
            None => Arc::new(JsonFileStore::new(&config.pool_file)),
        };
        let sources: Arc<dyn SourceFactory> = match self.sources {
            Some(sources) => sources,
            None => Arc::new(ModeSourceFactory::new(config.mode.clone())),
        };
        let engine = match self.engine {
            Some(engine) => engine,
            None => SearchEngine::detect(&config.accelerator),
        };

        let pool = PersistentPool::load(store, &pattern, &config.mode, sources.as_ref()).await;
        info!(
            "Starting vanity pool: pattern {}, target {}, low water mark {}, {} pooled, accelerated: {}",
            pattern,
            config.target_size,
            config.low_water_mark,
            pool.len(),
            engine.is_accelerated()
        );

        let inner = Arc::new(Inner {
            refill_permits: Semaphore::new(config.max_concurrent_refills),
            config,
            pattern,
            engine,
            sources,
            pool: Mutex::new(pool),
            contexts: Mutex::new(HashMap::new()),
            metrics: PoolMetrics::new(),
            health_task: Mutex::new(None),
        });

        let health = spawn_health_check(Arc::downgrade(&inner), inner.config.health_check_interval());
        *inner.health_task.lock().await = Some(health);

        Ok(PoolManager { inner })
    }
}

impl PoolManager {
    /// Start a manager with default store, sources and engine for `config`.
    pub async fn start(config: PoolConfig) -> Result<Self> {
        PoolManagerBuilder::new(config).start().await
    }

    /// Serve one candidate for `key`.
    ///
    /// Pops the oldest pooled candidate; on a miss, searches on demand with
    /// the short budget. Either way the partition is topped up in the
    /// background. Fails with [`PoolError::TemporarilyUnavailable`] when the
    /// on-demand search exhausts every round.
    #[instrument(skip_all, fields(key = %KeyLabel(&key)))]
    pub async fn fetch_candidate(&self, key: PoolKey) -> Result<Candidate, PoolError> {
        self.inner.config.mode.check_key(&key)?;
        let _serving = self.inner.begin_serving(key).await;

        let taken = {
            let mut pool = self.inner.pool.lock().await;
            match pool.take(&key).await {
                Some(candidate) => Some((candidate, pool.count(&key))),
                None => None,
            }
        };

        if let Some((candidate, remaining)) = taken {
            self.inner.metrics.record_pool_hit();
            info!(
                "Served {} from pool for {}, {} remaining",
                candidate.address,
                KeyLabel(&key),
                remaining
            );
            if remaining <= self.inner.config.low_water_mark {
                self.inner.schedule_refill(key).await;
            }
            return Ok(candidate);
        }

        debug!("Pool empty for {}, searching on demand", KeyLabel(&key));
        let result = self.inner.search_on_demand(&key).await;
        self.inner.schedule_refill(key).await;
        result
    }

    /// Ask for a background top-up of `key`. Idempotent while a refill for
    /// the key is scheduled or running.
    #[instrument(skip_all, fields(key = %KeyLabel(&key)))]
    pub async fn request_refill(&self, key: PoolKey) -> Result<RefillAck, PoolError> {
        self.inner.config.mode.check_key(&key)?;
        Ok(self.inner.schedule_refill(key).await)
    }

    /// Read-only snapshot of `key`'s partition. In program-derived mode,
    /// `None` reports the whole pool: every context's candidates, the busiest
    /// refill phase and the total number of requests in flight.
    pub async fn pool_status(&self, key: PoolKey) -> Result<PoolStatus, PoolError> {
        let whole_pool = key.is_none() && self.inner.config.mode.is_keyed();
        if !whole_pool {
            self.inner.config.mode.check_key(&key)?;
        }

        let (size, addresses, pooled_newest) = {
            let pool = self.inner.pool.lock().await;
            if whole_pool {
                (pool.len(), pool.all_addresses(), pool.newest_generated_at())
            } else {
                (pool.count(&key), pool.addresses(&key), pool.last_generated_at(&key))
            }
        };
        let (phase, serving, generated_at) = {
            let contexts = self.inner.contexts.lock().await;
            if whole_pool {
                contexts
                    .values()
                    .fold((RefillPhase::Idle, 0, None), |(phase, serving, newest), state| {
                        (
                            phase.max(state.phase),
                            serving + state.serving.load(Ordering::SeqCst),
                            newest.max(state.last_generated_at),
                        )
                    })
            } else {
                match contexts.get(&key) {
                    Some(state) => (
                        state.phase,
                        state.serving.load(Ordering::SeqCst),
                        state.last_generated_at,
                    ),
                    None => (RefillPhase::Idle, 0, None),
                }
            }
        };

        Ok(PoolStatus {
            key,
            pattern: self.inner.pattern.to_string(),
            size,
            target_size: self.inner.config.target_size,
            low_water_mark: self.inner.config.low_water_mark,
            last_generated_at: pooled_newest.max(generated_at),
            addresses,
            phase,
            serving,
            accelerated: self.inner.engine.is_accelerated(),
            metrics: self.inner.metrics.snapshot(),
        })
    }

    /// Schedule refills for every known partition at or below the low water
    /// mark. Runs periodically on its own; returns the number of refills
    /// started.
    pub async fn run_health_check(&self) -> usize {
        self.inner.health_check().await
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_accelerated(&self) -> bool {
        self.inner.engine.is_accelerated()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Per-key pool sizes, for log lines.
    pub async fn summary(&self) -> String {
        self.inner.pool.lock().await.summary()
    }

    /// Stop the health check and abort every refill task.
    pub async fn shutdown(&self) {
        if let Some(task) = self.inner.health_task.lock().await.take() {
            task.abort();
        }
        self.inner.refill_permits.close();

        let mut contexts = self.inner.contexts.lock().await;
        for state in contexts.values_mut() {
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.phase = RefillPhase::Idle;
        }
        info!("Vanity pool stopped");
    }
}

impl Inner {
    async fn begin_serving(&self, key: PoolKey) -> ServingGuard {
        let mut contexts = self.contexts.lock().await;
        let serving = Arc::clone(&contexts.entry(key).or_default().serving);
        serving.fetch_add(1, Ordering::SeqCst);
        ServingGuard(serving)
    }

    /// Short search a consumer waits on. Each retry round doubles the budget.
    async fn search_on_demand(&self, key: &PoolKey) -> Result<Candidate, PoolError> {
        let source = self.sources.source_for(key)?;
        let started = Instant::now();
        let round = AtomicU32::new(0);
        let attempts = AtomicU64::new(0);

        let strategy = FixedInterval::from_millis(self.config.on_demand_retry_delay_ms)
            .take(self.config.on_demand_retries);

        let found = Retry::spawn(strategy, || async {
            let n = round.fetch_add(1, Ordering::SeqCst);
            let budget = self.config.on_demand.scaled(1u32 << n.min(16));
            let outcome = self.engine.search(Arc::clone(&source), &self.pattern, &budget).await;

            attempts.fetch_add(outcome.stats().attempts, Ordering::SeqCst);
            self.metrics.record_attempts(outcome.stats().attempts);

            match outcome {
                SearchOutcome::Found { candidate, .. } => Ok(candidate),
                SearchOutcome::NotFound { reason, stats } => {
                    debug!(
                        "On-demand round {} exhausted ({:?}) after {} attempts",
                        n + 1,
                        reason,
                        stats.attempts
                    );
                    Err(reason)
                }
            }
        })
        .await;

        match found {
            Ok(candidate) => {
                self.metrics.record_on_demand();
                self.contexts.lock().await.entry(*key).or_default().last_generated_at = Some(candidate.created_at);
                info!("Generated {} on demand for {}", candidate.address, KeyLabel(key));
                Ok(candidate)
            }
            Err(_) => {
                self.metrics.record_unavailable();
                let attempts = attempts.load(Ordering::SeqCst);
                let elapsed = started.elapsed();
                warn!(
                    "On-demand search for {} found nothing after {} attempts in {:?}",
                    KeyLabel(key),
                    attempts,
                    elapsed
                );
                Err(PoolError::TemporarilyUnavailable { attempts, elapsed })
            }
        }
    }

    /// Spawn a refill task for `key` unless one is already in flight.
    async fn schedule_refill(self: &Arc<Self>, key: PoolKey) -> RefillAck {
        let mut contexts = self.contexts.lock().await;
        let state = contexts.entry(key).or_default();

        if state.phase != RefillPhase::Idle {
            return RefillAck {
                key,
                started: false,
                phase: state.phase,
            };
        }

        debug!("Scheduling refill for {}", KeyLabel(&key));
        state.phase = RefillPhase::Scheduled;
        let inner = Arc::clone(self);
        state.task = Some(tokio::spawn(async move { inner.run_refill(key).await }));

        RefillAck {
            key,
            started: true,
            phase: RefillPhase::Scheduled,
        }
    }

    async fn run_refill(self: Arc<Self>, key: PoolKey) {
        let source: Arc<dyn CandidateSource> = match self.sources.source_for(&key) {
            Ok(source) => source,
            Err(e) => {
                error!("Cannot refill {}: {}", KeyLabel(&key), e);
                self.finish_refill(&key).await;
                return;
            }
        };

        loop {
            // refill_done already handed the partition back to Idle
            if self.refill_done(&key).await {
                return;
            }

            let Ok(permit) = self.refill_permits.acquire().await else {
                debug!("Refill permits closed, stopping refill for {}", KeyLabel(&key));
                break;
            };
            self.set_phase(&key, RefillPhase::Refilling).await;

            let outcome = self
                .engine
                .search(Arc::clone(&source), &self.pattern, &self.config.background)
                .await;
            drop(permit);
            self.metrics.record_attempts(outcome.stats().attempts);

            match outcome {
                SearchOutcome::Found { candidate, stats } => {
                    info!(
                        "Generated {} for {} after {} attempts ({:.0}/s)",
                        candidate.address,
                        KeyLabel(&key),
                        stats.attempts,
                        stats.attempts_per_second()
                    );
                    let created_at = candidate.created_at;
                    self.pool.lock().await.add(candidate).await;
                    self.metrics.record_generated();
                    self.contexts.lock().await.entry(key).or_default().last_generated_at = Some(created_at);
                    tokio::task::yield_now().await;
                }
                SearchOutcome::NotFound { reason, stats } => {
                    self.metrics.record_refill_failure();
                    let limit = match reason {
                        ExhaustReason::Attempts => "attempt limit",
                        ExhaustReason::WallClock => "time limit",
                    };
                    warn!(
                        "Refill search for {} hit its {} after {} attempts; retrying in {:?}",
                        KeyLabel(&key),
                        limit,
                        stats.attempts,
                        self.config.refill_backoff()
                    );
                    tokio::time::sleep(self.config.refill_backoff()).await;
                }
            }
        }

        self.finish_refill(&key).await;
    }

    /// Check the target under the context lock, so a request that drains the
    /// pool after this point sees `Idle` and schedules a fresh refill. Marks
    /// the partition idle when done.
    async fn refill_done(&self, key: &PoolKey) -> bool {
        let mut contexts = self.contexts.lock().await;
        let count = self.pool.lock().await.count(key);
        if count < self.config.target_size {
            return false;
        }

        info!("Pool for {} at target ({} candidates)", KeyLabel(key), count);
        let state = contexts.entry(*key).or_default();
        state.phase = RefillPhase::Idle;
        state.task = None;
        true
    }

    async fn finish_refill(&self, key: &PoolKey) {
        let mut contexts = self.contexts.lock().await;
        let state = contexts.entry(*key).or_default();
        state.phase = RefillPhase::Idle;
        state.task = None;
    }

    async fn set_phase(&self, key: &PoolKey, phase: RefillPhase) {
        self.contexts.lock().await.entry(*key).or_default().phase = phase;
    }

    /// Forget contexts with nothing pooled, no refill and no request in
    /// flight. Returns how many were dropped.
    async fn prune_idle_contexts(&self) -> usize {
        let mut contexts = self.contexts.lock().await;
        let pool = self.pool.lock().await;
        let before = contexts.len();
        contexts.retain(|key, state| {
            state.phase != RefillPhase::Idle
                || state.task.is_some()
                || state.serving.load(Ordering::SeqCst) > 0
                || pool.count(key) > 0
        });
        before - contexts.len()
    }

    async fn health_check(self: &Arc<Self>) -> usize {
        let pruned = self.prune_idle_contexts().await;
        if pruned > 0 {
            debug!("Health check forgot {} idle empty partitions", pruned);
        }

        let mut keys = self.pool.lock().await.keys();
        keys.extend(self.contexts.lock().await.keys().copied());
        if !self.config.mode.is_keyed() {
            keys.insert(None);
        }

        let mut started = 0;
        for key in keys {
            let count = self.pool.lock().await.count(&key);
            if count <= self.config.low_water_mark && self.schedule_refill(key).await.started {
                debug!("Health check refilling {} ({} pooled)", KeyLabel(&key), count);
                started += 1;
            }
        }

        if started > 0 {
            info!("Health check scheduled {} refills", started);
        }
        started
    }
}

/// Periodic self-heal. The first tick fires immediately, which covers the
/// startup sweep. Ends once the manager is dropped.
fn spawn_health_check(inner: Weak<Inner>, period: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.health_check().await;
        }
    })
}
