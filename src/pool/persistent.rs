//! In-memory FIFO pool mirrored to a [`PoolStore`].

use crate::pool::config::PoolMode;
use crate::pool::deriver::SourceFactory;
use crate::pool::matcher::VanityPattern;
use crate::pool::storage::PoolStore;
use crate::types::{Candidate, KeyLabel, PoolKey};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Ordered candidate pool. Insertion order is serve order within each key.
///
/// Every mutation rewrites the store. A failed write is logged and the pool
/// keeps serving from memory.
pub struct PersistentPool {
    entries: VecDeque<Candidate>,
    store: Arc<dyn PoolStore>,
}

impl PersistentPool {
    /// Empty pool backed by `store`, without reading it.
    pub fn new(store: Arc<dyn PoolStore>) -> Self {
        Self {
            entries: VecDeque::new(),
            store,
        }
    }

    /// Read the stored pool, keeping only entries that still satisfy
    /// `pattern`, fit `mode` and re-derive under `sources`. An unreadable
    /// store yields an empty pool.
    pub async fn load(
        store: Arc<dyn PoolStore>,
        pattern: &VanityPattern,
        mode: &PoolMode,
        sources: &dyn SourceFactory,
    ) -> Self {
        let stored = match store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to load pool from {}: {:#}; starting empty", store.describe(), e);
                return Self::new(store);
            }
        };

        let total = stored.len();
        let entries: VecDeque<Candidate> = stored
            .into_iter()
            .filter(|candidate| {
                pattern.matches_address(&candidate.address)
                    && mode.check_key(&candidate.key()).is_ok()
                    && sources.reproduces(candidate)
            })
            .collect();

        if entries.len() < total {
            warn!(
                "Dropped {} stored candidates that do not match pattern {} or no longer derive under the configured mode",
                total - entries.len(),
                pattern
            );
        }
        info!("Loaded {} candidates from {}", entries.len(), store.describe());

        Self { entries, store }
    }

    /// Remove and return the oldest candidate for `key`.
    pub async fn take(&mut self, key: &PoolKey) -> Option<Candidate> {
        let index = self.entries.iter().position(|candidate| candidate.key() == *key)?;
        let candidate = self.entries.remove(index)?;
        self.persist().await;
        Some(candidate)
    }

    pub async fn add(&mut self, candidate: Candidate) {
        self.entries.push_back(candidate);
        self.persist().await;
    }

    async fn persist(&mut self) {
        if let Err(e) = self.store.save(self.entries.make_contiguous()).await {
            error!(
                "Failed to persist pool to {}: {:#}; continuing from memory",
                self.store.describe(),
                e
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, key: &PoolKey) -> usize {
        self.entries.iter().filter(|candidate| candidate.key() == *key).count()
    }

    /// Base-58 addresses available for `key`, oldest first.
    pub fn addresses(&self, key: &PoolKey) -> Vec<String> {
        self.entries
            .iter()
            .filter(|candidate| candidate.key() == *key)
            .map(|candidate| candidate.address.to_string())
            .collect()
    }

    /// Every pooled address across all keys, oldest first.
    pub fn all_addresses(&self) -> Vec<String> {
        self.entries.iter().map(|candidate| candidate.address.to_string()).collect()
    }

    pub fn newest_generated_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|candidate| candidate.created_at).max()
    }

    /// Every key with at least one pooled candidate.
    pub fn keys(&self) -> BTreeSet<PoolKey> {
        self.entries.iter().map(Candidate::key).collect()
    }

    pub fn last_generated_at(&self, key: &PoolKey) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|candidate| candidate.key() == *key)
            .map(|candidate| candidate.created_at)
            .max()
    }

    /// One line per key, for periodic status logs.
    pub fn summary(&self) -> String {
        self.keys()
            .iter()
            .map(|key| format!("{}={}", KeyLabel(key), self.count(key)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
