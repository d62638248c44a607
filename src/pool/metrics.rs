//! Counters for pool activity.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free pool counters, shared by the manager and its refill tasks.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    served_from_pool: AtomicU64,
    served_on_demand: AtomicU64,
    unavailable: AtomicU64,
    generated: AtomicU64,
    refill_failures: AtomicU64,
    search_attempts: AtomicU64,
}

/// Point-in-time copy of [`PoolMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Requests answered straight from the pool
    pub served_from_pool: u64,
    /// Requests answered by an on-demand search
    pub served_on_demand: u64,
    /// Requests that ended in `TemporarilyUnavailable`
    pub unavailable: u64,
    /// Candidates added by background refills
    pub generated: u64,
    /// Background searches that exhausted their budget
    pub refill_failures: u64,
    /// Derivation attempts across all searches
    pub search_attempts: u64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pool_hit(&self) {
        self.served_from_pool.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_on_demand(&self) {
        self.served_on_demand.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generated(&self) {
        self.generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refill_failure(&self) {
        self.refill_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempts(&self, attempts: u64) {
        self.search_attempts.fetch_add(attempts, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            served_from_pool: self.served_from_pool.load(Ordering::Relaxed),
            served_on_demand: self.served_on_demand.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            refill_failures: self.refill_failures.load(Ordering::Relaxed),
            search_attempts: self.search_attempts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recorded_events() {
        let metrics = PoolMetrics::new();
        metrics.record_pool_hit();
        metrics.record_pool_hit();
        metrics.record_on_demand();
        metrics.record_refill_failure();
        metrics.record_attempts(1_500);
        metrics.record_attempts(500);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.served_from_pool, 2);
        assert_eq!(snapshot.served_on_demand, 1);
        assert_eq!(snapshot.refill_failures, 1);
        assert_eq!(snapshot.search_attempts, 2_000);
        assert_eq!(snapshot.generated, 0);
    }
}
