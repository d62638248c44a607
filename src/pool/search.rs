//! Portable cooperative search loop.
//!
//! Runs on the async runtime itself, so it must hand control back to the
//! scheduler after every batch; otherwise a long search would stall every
//! other task sharing the worker thread.

use crate::pool::deriver::CandidateSource;
use crate::pool::matcher::VanityPattern;
use crate::pool::types::{ExhaustReason, SearchBudget, SearchOutcome, SearchStats};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// Brute-force search for a candidate matching a pattern.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(
        &self,
        source: Arc<dyn CandidateSource>,
        pattern: &VanityPattern,
        budget: &SearchBudget,
    ) -> SearchOutcome;
}

/// Single-task search that yields to the scheduler every `batch_size`
/// attempts.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableSearch;

#[async_trait]
impl Searcher for PortableSearch {
    #[instrument(skip_all, fields(pattern = %pattern, max_attempts = budget.max_attempts))]
    async fn search(
        &self,
        source: Arc<dyn CandidateSource>,
        pattern: &VanityPattern,
        budget: &SearchBudget,
    ) -> SearchOutcome {
        let started = Instant::now();
        let deadline = budget.max_wall_clock();
        let batch = u64::from(budget.batch_size.max(1));
        let mut stats = SearchStats::default();

        loop {
            let remaining = budget.max_attempts.saturating_sub(stats.attempts);
            if remaining == 0 {
                stats.elapsed = started.elapsed();
                debug!("Search exhausted {} attempts in {:?}", stats.attempts, stats.elapsed);
                return SearchOutcome::NotFound {
                    reason: ExhaustReason::Attempts,
                    stats,
                };
            }

            for _ in 0..remaining.min(batch) {
                stats.attempts += 1;
                match source.draw() {
                    Ok(candidate) if pattern.matches_address(&candidate.address) => {
                        stats.elapsed = started.elapsed();
                        debug!(
                            "Found {} after {} attempts in {:?}",
                            candidate.address, stats.attempts, stats.elapsed
                        );
                        return SearchOutcome::Found { candidate, stats };
                    }
                    Ok(_) => {}
                    Err(_) => stats.derivation_failures += 1,
                }
            }

            tokio::task::yield_now().await;
            stats.yields += 1;

            if started.elapsed() >= deadline {
                stats.elapsed = started.elapsed();
                debug!(
                    "Search hit wall-clock limit {:?} after {} attempts",
                    deadline, stats.attempts
                );
                return SearchOutcome::NotFound {
                    reason: ExhaustReason::WallClock,
                    stats,
                };
            }
        }
    }
}
