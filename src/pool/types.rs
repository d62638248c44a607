//! Search and status types shared across the pool components.

use crate::pool::metrics::MetricsSnapshot;
use crate::types::{Candidate, PoolKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-invocation search limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBudget {
    /// Upper bound on derivation attempts
    pub max_attempts: u64,
    /// Wall-clock ceiling in milliseconds, checked at every batch boundary
    pub max_wall_clock_ms: u64,
    /// Attempts between cooperative yields
    pub batch_size: u32,
}

impl SearchBudget {
    /// Short budget for a consumer that is waiting.
    pub fn on_demand() -> Self {
        Self {
            max_attempts: 200_000,
            max_wall_clock_ms: 5_000,
            batch_size: 256,
        }
    }

    /// Larger budget for background refills.
    pub fn background() -> Self {
        Self {
            max_attempts: 5_000_000,
            max_wall_clock_ms: 60_000,
            batch_size: 256,
        }
    }

    pub fn max_wall_clock(&self) -> Duration {
        Duration::from_millis(self.max_wall_clock_ms)
    }

    /// Multiply attempt and time ceilings, keeping the batch size.
    pub fn scaled(&self, factor: u32) -> Self {
        let factor = u64::from(factor.max(1));
        Self {
            max_attempts: self.max_attempts.saturating_mul(factor),
            max_wall_clock_ms: self.max_wall_clock_ms.saturating_mul(factor),
            batch_size: self.batch_size,
        }
    }
}

/// Counters from one search invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    /// Derivation attempts made
    pub attempts: u64,
    /// Attempts whose derivation failed and were skipped
    pub derivation_failures: u64,
    /// Batch boundaries reached (cooperative yields on the portable path)
    pub yields: u64,
    /// Time spent searching
    pub elapsed: Duration,
}

impl SearchStats {
    pub fn attempts_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.attempts as f64 / secs
        } else {
            0.0
        }
    }
}

/// Which ceiling ended an unsuccessful search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    Attempts,
    WallClock,
}

/// Result of a search. `NotFound` is an expected outcome, not an error.
#[derive(Debug)]
pub enum SearchOutcome {
    Found {
        candidate: Candidate,
        stats: SearchStats,
    },
    NotFound {
        reason: ExhaustReason,
        stats: SearchStats,
    },
}

impl SearchOutcome {
    pub fn stats(&self) -> &SearchStats {
        match self {
            SearchOutcome::Found { stats, .. } | SearchOutcome::NotFound { stats, .. } => stats,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found { .. })
    }

    pub fn into_candidate(self) -> Option<Candidate> {
        match self {
            SearchOutcome::Found { candidate, .. } => Some(candidate),
            SearchOutcome::NotFound { .. } => None,
        }
    }
}

/// Background refill phase of one pool partition, ordered from least to most
/// active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillPhase {
    #[default]
    Idle,
    /// Refill task spawned, waiting for a search permit
    Scheduled,
    /// Refill task is generating candidates
    Refilling,
}

/// Answer to a refill request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefillAck {
    pub key: PoolKey,
    /// False when a refill for this key was already in flight
    pub started: bool,
    pub phase: RefillPhase,
}

/// Read-only view of one pool partition. Never carries private material.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub key: PoolKey,
    pub pattern: String,
    pub size: usize,
    pub target_size: usize,
    pub low_water_mark: usize,
    pub last_generated_at: Option<DateTime<Utc>>,
    /// Base-58 addresses available to serve, oldest first
    pub addresses: Vec<String>,
    pub phase: RefillPhase,
    /// Consumer requests currently in flight
    pub serving: usize,
    /// Whether the accelerated search path is active
    pub accelerated: bool,
    pub metrics: MetricsSnapshot,
}
