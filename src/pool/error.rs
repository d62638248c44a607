//! Error types for the vanity pool.

use std::time::Duration;
use thiserror::Error;

/// A single derivation attempt produced no usable address.
///
/// Routine inside a search: the attempt is counted and a fresh salt is drawn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationFailure {
    #[error("no bump yields an off-curve address for this seed set")]
    NoViableBump,

    #[error("seed of {len} bytes exceeds the {max} byte limit")]
    SeedTooLong { len: usize, max: usize },
}

/// A vanity pattern that can never match a base-58 address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern {pattern:?} contains {ch:?}, which is not in the base-58 alphabet")]
    InvalidCharacter { pattern: String, ch: char },

    #[error("pattern {pattern:?} is longer than any base-58 address")]
    TooLong { pattern: String },
}

/// Why the accelerated search path is off for this process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcceleratorUnavailable {
    #[error("accelerated search disabled by configuration")]
    Disabled,

    #[error("failed to build search thread pool: {0}")]
    ThreadPool(String),

    #[error("self-test derivation did not match the portable deriver")]
    SelfTestMismatch,
}

/// Invalid pool configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("empty pattern requires allow_unconstrained = true")]
    EmptyPattern,

    #[error("target_size must be greater than zero")]
    ZeroTarget,

    #[error("low_water_mark ({low}) must be below target_size ({target})")]
    LowWaterMark { low: usize, target: usize },

    #[error("{0} batch_size must be greater than zero")]
    ZeroBatch(&'static str),

    #[error("salt_len must be between 1 and {max}, got {len}")]
    SaltLength { len: usize, max: usize },

    #[error("seed_prefix of {len} bytes exceeds the {max} byte limit")]
    SeedPrefixTooLong { len: usize, max: usize },

    #[error("max_concurrent_refills must be greater than zero")]
    ZeroRefillConcurrency,
}

/// Errors surfaced to pool consumers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("vanity pool temporarily empty after {attempts} attempts in {elapsed:?}, try again shortly")]
    TemporarilyUnavailable { attempts: u64, elapsed: Duration },

    #[error("program-derived pool requires a creator/mint context")]
    ContextRequired,

    #[error("keypair pool does not take a creator/mint context")]
    ContextNotAllowed,

    #[error("cannot build candidate source: {0}")]
    Source(String),
}

impl From<DerivationFailure> for PoolError {
    fn from(err: DerivationFailure) -> Self {
        PoolError::Source(err.to_string())
    }
}
