//! Accelerated multi-core search.
//!
//! Same derivation and matching as [`PortableSearch`](crate::pool::search::PortableSearch),
//! fanned out over a dedicated rayon pool and run off the async runtime via
//! `spawn_blocking`. Availability is decided once by [`NativeAccelerator::detect`].

use crate::pool::config::AcceleratorConfig;
use crate::pool::deriver::{derive_program_address, CandidateSource};
use crate::pool::error::AcceleratorUnavailable;
use crate::pool::matcher::VanityPattern;
use crate::pool::types::{ExhaustReason, SearchBudget, SearchOutcome, SearchStats};
use crate::types::{Candidate, KeyContext};
use rayon::prelude::*;
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, info, instrument};

/// Multi-core search backend.
pub struct NativeAccelerator {
    pool: Arc<rayon::ThreadPool>,
}

impl NativeAccelerator {
    /// Bring up the accelerated path, or explain why it is unavailable.
    pub fn detect(config: &AcceleratorConfig) -> Result<Self, AcceleratorUnavailable> {
        if !config.enabled {
            return Err(AcceleratorUnavailable::Disabled);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("vanity-search-{}", i))
            .build()
            .map_err(|e| AcceleratorUnavailable::ThreadPool(e.to_string()))?;

        self_test(&pool)?;

        info!(
            "Accelerated search ready with {} worker threads",
            pool.current_num_threads()
        );
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run one search on the worker pool.
    ///
    /// Errors only when the blocking task panicked or was cancelled; the
    /// caller falls back to the portable loop for that request.
    #[instrument(skip_all, fields(pattern = %pattern, max_attempts = budget.max_attempts))]
    pub async fn search(
        &self,
        source: Arc<dyn CandidateSource>,
        pattern: &VanityPattern,
        budget: &SearchBudget,
    ) -> Result<SearchOutcome, JoinError> {
        let pool = Arc::clone(&self.pool);
        let pattern = pattern.clone();
        let budget = budget.clone();

        tokio::task::spawn_blocking(move || {
            pool.install(|| parallel_search(source.as_ref(), &pattern, &budget))
        })
        .await
    }
}

/// The worker threads must reproduce the calling thread's derivation exactly.
fn self_test(pool: &rayon::ThreadPool) -> Result<(), AcceleratorUnavailable> {
    let program_id = Pubkey::new_from_array([0x11; 32]);
    let context = KeyContext::new(Pubkey::new_from_array([0x22; 32]), Pubkey::new_from_array([0x33; 32]));
    let salt = [0x5a; 8];

    let expected = derive_program_address(&program_id, b"self-test", &context, &salt).ok();
    let observed = pool.install(|| derive_program_address(&program_id, b"self-test", &context, &salt).ok());

    if expected.is_none() || expected != observed {
        return Err(AcceleratorUnavailable::SelfTestMismatch);
    }
    Ok(())
}

/// Workers claim `batch_size` slices from a shared counter until one finds a
/// match or a ceiling is reached.
fn parallel_search(
    source: &dyn CandidateSource,
    pattern: &VanityPattern,
    budget: &SearchBudget,
) -> SearchOutcome {
    let started = Instant::now();
    let deadline = budget.max_wall_clock();
    let batch = u64::from(budget.batch_size.max(1));
    let workers = rayon::current_num_threads().max(1);

    let reserved = AtomicU64::new(0);
    let attempts = AtomicU64::new(0);
    let failures = AtomicU64::new(0);
    let batches = AtomicU64::new(0);
    let found = AtomicBool::new(false);

    let hit: Option<Candidate> = (0..workers).into_par_iter().find_map_any(|_| loop {
        if found.load(Ordering::Relaxed) || started.elapsed() >= deadline {
            return None;
        }

        let start = reserved.fetch_add(batch, Ordering::Relaxed);
        if start >= budget.max_attempts {
            return None;
        }
        let end = start.saturating_add(batch).min(budget.max_attempts);

        let mut done = 0;
        for _ in start..end {
            done += 1;
            match source.draw() {
                Ok(candidate) if pattern.matches_address(&candidate.address) => {
                    attempts.fetch_add(done, Ordering::Relaxed);
                    found.store(true, Ordering::Relaxed);
                    return Some(candidate);
                }
                Ok(_) => {}
                Err(_) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        attempts.fetch_add(done, Ordering::Relaxed);
        batches.fetch_add(1, Ordering::Relaxed);
    });

    let stats = SearchStats {
        attempts: attempts.into_inner(),
        derivation_failures: failures.into_inner(),
        yields: batches.into_inner(),
        elapsed: started.elapsed(),
    };

    match hit {
        Some(candidate) => {
            debug!(
                "Accelerated search found {} after {} attempts in {:?}",
                candidate.address, stats.attempts, stats.elapsed
            );
            SearchOutcome::Found { candidate, stats }
        }
        None => {
            let reason = if stats.attempts >= budget.max_attempts {
                ExhaustReason::Attempts
            } else {
                ExhaustReason::WallClock
            };
            SearchOutcome::NotFound { reason, stats }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::search::test_sources::NeverMatch;

    fn accelerator(threads: usize) -> NativeAccelerator {
        NativeAccelerator::detect(&AcceleratorConfig {
            enabled: true,
            threads,
        })
        .expect("accelerator should come up in tests")
    }

    #[test]
    fn test_detect_respects_disabled_flag() {
        let result = NativeAccelerator::detect(&AcceleratorConfig {
            enabled: false,
            threads: 2,
        });
        assert_eq!(result.err(), Some(AcceleratorUnavailable::Disabled));
    }

    #[test]
    fn test_detect_uses_requested_threads() {
        assert_eq!(accelerator(3).threads(), 3);
    }

    #[tokio::test]
    async fn test_parallel_attempt_ceiling_is_exact() {
        let source = Arc::new(NeverMatch::default());
        let budget = SearchBudget {
            max_attempts: 10_007,
            max_wall_clock_ms: 60_000,
            batch_size: 64,
        };
        let pattern = VanityPattern::suffix("zz").unwrap();

        let outcome = accelerator(4)
            .search(source.clone(), &pattern, &budget)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            SearchOutcome::NotFound { reason: ExhaustReason::Attempts, .. }
        ));
        assert_eq!(outcome.stats().attempts, 10_007);
        assert_eq!(source.draws.load(Ordering::Relaxed), 10_007);
    }

    #[tokio::test]
    async fn test_parallel_wall_clock_ceiling() {
        let budget = SearchBudget {
            max_attempts: u64::MAX,
            max_wall_clock_ms: 20,
            batch_size: 128,
        };
        let pattern = VanityPattern::suffix("zz").unwrap();

        let outcome = accelerator(2)
            .search(Arc::new(NeverMatch::default()), &pattern, &budget)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            SearchOutcome::NotFound { reason: ExhaustReason::WallClock, .. }
        ));
    }
}
