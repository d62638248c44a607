//! vanity-pool - Vanity address and program-derived address generation pool
//!
//! This crate searches for Solana addresses ending in a chosen suffix, keeps a
//! persisted pool of ready candidates per creator/mint context, and serves them
//! instantly while refilling in the background.

pub mod types;
pub mod pool;

// Re-export main types for convenience
pub use pool::{PoolConfig, PoolError, PoolManager, PoolManagerBuilder, PoolStatus, RefillAck};
pub use types::{Candidate, Derivation, KeyContext, PoolKey, SecretKey};
