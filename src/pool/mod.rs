//! Vanity address pool.
//!
//! Brute-force search for addresses ending in a chosen suffix, a persisted
//! FIFO pool of finished candidates, and a manager that serves from the pool
//! while refilling it in the background. Searches either run cooperatively on
//! the async runtime or fan out over a multi-core worker pool.

pub mod accelerator;
pub mod config;
pub mod deriver;
pub mod engine;
pub mod error;
pub mod manager;
pub mod matcher;
pub mod metrics;
pub mod persistent;
pub mod search;
pub mod storage;
pub mod types;

// Re-export main public types and the manager
pub use config::{AcceleratorConfig, PoolConfig, PoolMode};
pub use error::{AcceleratorUnavailable, ConfigError, DerivationFailure, PatternError, PoolError};
pub use manager::{PoolManager, PoolManagerBuilder};
pub use matcher::VanityPattern;
pub use metrics::MetricsSnapshot;
pub use types::{
    ExhaustReason, PoolStatus, RefillAck, RefillPhase, SearchBudget, SearchOutcome, SearchStats,
};

// Re-export lower-level components for advanced usage
pub use accelerator::NativeAccelerator;
pub use deriver::{
    derive_program_address, generate_keypair, CandidateSource, KeypairSource, ModeSourceFactory,
    ProgramAddressSource, SourceFactory,
};
pub use engine::SearchEngine;
pub use persistent::PersistentPool;
pub use search::{PortableSearch, Searcher};
pub use storage::{JsonFileStore, MemoryStore, PoolStore};

use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;

/// Config builder for convenient construction with sensible defaults.
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Generate random key pairs.
    pub fn keypair_mode(mut self) -> Self {
        self.config.mode = PoolMode::Keypair;
        self
    }

    /// Generate program-derived addresses under `program_id`.
    pub fn program_derived(mut self, program_id: Pubkey, seed_prefix: impl Into<String>) -> Self {
        let salt_len = match &self.config.mode {
            PoolMode::ProgramDerived { salt_len, .. } => *salt_len,
            PoolMode::Keypair => 8,
        };
        self.config.mode = PoolMode::ProgramDerived {
            program_id,
            seed_prefix: seed_prefix.into(),
            salt_len,
        };
        self
    }

    /// Set the salt length for program-derived mode.
    pub fn with_salt_len(mut self, len: usize) -> Self {
        if let PoolMode::ProgramDerived { salt_len, .. } = &mut self.config.mode {
            *salt_len = len;
        }
        self
    }

    /// Set the address suffix.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.pattern = pattern.into();
        self
    }

    /// Allow an empty pattern.
    pub fn allow_unconstrained(mut self, allow: bool) -> Self {
        self.config.allow_unconstrained = allow;
        self
    }

    /// Set target size and low water mark.
    pub fn with_pool_size(mut self, target_size: usize, low_water_mark: usize) -> Self {
        self.config.target_size = target_size;
        self.config.low_water_mark = low_water_mark;
        self
    }

    /// Set the on-demand search budget.
    pub fn with_on_demand_budget(mut self, budget: SearchBudget) -> Self {
        self.config.on_demand = budget;
        self
    }

    /// Set the background search budget.
    pub fn with_background_budget(mut self, budget: SearchBudget) -> Self {
        self.config.background = budget;
        self
    }

    /// Set on-demand retry rounds and the pause between them.
    pub fn with_on_demand_retries(mut self, retries: usize, delay_ms: u64) -> Self {
        self.config.on_demand_retries = retries;
        self.config.on_demand_retry_delay_ms = delay_ms;
        self
    }

    /// Set the delay after a failed refill search in milliseconds.
    pub fn with_refill_backoff(mut self, backoff_ms: u64) -> Self {
        self.config.refill_backoff_ms = backoff_ms;
        self
    }

    /// Set the health check period in seconds.
    pub fn with_health_check_interval(mut self, secs: u64) -> Self {
        self.config.health_check_interval_secs = secs;
        self
    }

    /// Set how many refill searches may run at once.
    pub fn with_max_concurrent_refills(mut self, permits: usize) -> Self {
        self.config.max_concurrent_refills = permits;
        self
    }

    /// Set the pool file location.
    pub fn with_pool_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pool_file = path.into();
        self
    }

    /// Enable or disable the accelerated search path.
    pub fn with_accelerator(mut self, enabled: bool, threads: usize) -> Self {
        self.config.accelerator = AcceleratorConfig { enabled, threads };
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
