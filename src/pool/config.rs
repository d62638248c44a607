//! Pool configuration.

use crate::pool::error::{ConfigError, PoolError};
use crate::pool::matcher::VanityPattern;
use crate::pool::types::SearchBudget;
use crate::types::{pubkey_string, PoolKey};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::{Pubkey, MAX_SEED_LEN};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the pool produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolMode {
    /// Unkeyed pool of random key pairs
    Keypair,
    /// Pool of program-derived addresses partitioned by creator/mint
    ProgramDerived {
        #[serde(with = "pubkey_string")]
        program_id: Pubkey,
        /// Optional leading seed, omitted when empty
        #[serde(default)]
        seed_prefix: String,
        /// Random salt length in bytes
        #[serde(default = "default_salt_len")]
        salt_len: usize,
    },
}

fn default_salt_len() -> usize {
    8
}

impl PoolMode {
    /// Reject keys that do not fit this mode.
    pub fn check_key(&self, key: &PoolKey) -> Result<(), PoolError> {
        match (self, key) {
            (PoolMode::Keypair, None) | (PoolMode::ProgramDerived { .. }, Some(_)) => Ok(()),
            (PoolMode::Keypair, Some(_)) => Err(PoolError::ContextNotAllowed),
            (PoolMode::ProgramDerived { .. }, None) => Err(PoolError::ContextRequired),
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, PoolMode::ProgramDerived { .. })
    }
}

/// Accelerated (multi-core) search settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Try to bring up the accelerated path at startup
    pub enabled: bool,
    /// Worker threads; 0 uses one per core
    pub threads: usize,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threads: 0,
        }
    }
}

/// Complete pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Keypair or program-derived generation
    pub mode: PoolMode,
    /// Case-insensitive address suffix
    pub pattern: String,
    /// Permit an empty pattern (no vanity filtering)
    pub allow_unconstrained: bool,
    /// Candidates to keep per partition
    pub target_size: usize,
    /// Refill when a partition drops to this size
    pub low_water_mark: usize,
    /// Budget for searches a consumer is waiting on
    pub on_demand: SearchBudget,
    /// Budget for each background refill search
    pub background: SearchBudget,
    /// Extra on-demand rounds after the first, each with double the budget
    pub on_demand_retries: usize,
    /// Pause between on-demand rounds in milliseconds
    pub on_demand_retry_delay_ms: u64,
    /// Fixed delay after a failed refill search in milliseconds
    pub refill_backoff_ms: u64,
    /// Period of the self-healing health check in seconds
    pub health_check_interval_secs: u64,
    /// Refill searches allowed to run at once across all partitions
    pub max_concurrent_refills: usize,
    /// Pool file location (sensitive: holds secrets or salts)
    pub pool_file: PathBuf,
    /// Accelerated search settings
    pub accelerator: AcceleratorConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mode: PoolMode::Keypair,
            pattern: "pump".to_string(),
            allow_unconstrained: false,
            target_size: 10,
            low_water_mark: 3,
            on_demand: SearchBudget::on_demand(),
            background: SearchBudget::background(),
            on_demand_retries: 1,
            on_demand_retry_delay_ms: 0,
            refill_backoff_ms: 5_000,
            health_check_interval_secs: 300,
            max_concurrent_refills: 1,
            pool_file: PathBuf::from("./vanity_pool.json"),
            accelerator: AcceleratorConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vanity_pattern()?;

        if self.target_size == 0 {
            return Err(ConfigError::ZeroTarget);
        }
        if self.low_water_mark >= self.target_size {
            return Err(ConfigError::LowWaterMark {
                low: self.low_water_mark,
                target: self.target_size,
            });
        }
        if self.on_demand.batch_size == 0 {
            return Err(ConfigError::ZeroBatch("on_demand"));
        }
        if self.background.batch_size == 0 {
            return Err(ConfigError::ZeroBatch("background"));
        }
        if self.max_concurrent_refills == 0 {
            return Err(ConfigError::ZeroRefillConcurrency);
        }

        if let PoolMode::ProgramDerived {
            seed_prefix,
            salt_len,
            ..
        } = &self.mode
        {
            if *salt_len == 0 || *salt_len > MAX_SEED_LEN {
                return Err(ConfigError::SaltLength {
                    len: *salt_len,
                    max: MAX_SEED_LEN,
                });
            }
            if seed_prefix.len() > MAX_SEED_LEN {
                return Err(ConfigError::SeedPrefixTooLong {
                    len: seed_prefix.len(),
                    max: MAX_SEED_LEN,
                });
            }
        }

        Ok(())
    }

    /// The compiled pattern. An empty pattern is only honoured when
    /// `allow_unconstrained` is set.
    pub fn vanity_pattern(&self) -> Result<VanityPattern, ConfigError> {
        if self.pattern.is_empty() {
            if self.allow_unconstrained {
                return Ok(VanityPattern::any());
            }
            return Err(ConfigError::EmptyPattern);
        }
        Ok(VanityPattern::suffix(&self.pattern)?)
    }

    pub fn refill_backoff(&self) -> Duration {
        Duration::from_millis(self.refill_backoff_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }
}
