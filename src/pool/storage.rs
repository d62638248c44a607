//! Storage abstraction for the candidate pool.
//!
//! The pool is small, so every mutation rewrites the whole collection. The
//! file holds private keys or derivation salts and must be treated as a
//! secret: it is created owner-only and should stay out of backups and
//! version control.

use crate::types::Candidate;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Current on-disk format version.
pub const POOL_FILE_VERSION: u32 = 1;

/// Contract for durable pool storage.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Load every stored candidate in serve order.
    async fn load(&self) -> Result<Vec<Candidate>>;

    /// Replace the stored pool with `candidates`.
    async fn save(&self, candidates: &[Candidate]) -> Result<()>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

#[derive(Serialize)]
struct PoolFileOut<'a> {
    version: u32,
    candidates: &'a [Candidate],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PoolFileIn {
    Versioned { version: u32, candidates: Vec<Candidate> },
    /// Bare array written before the format was versioned
    Legacy(Vec<Candidate>),
}

/// JSON file store with atomic replace-on-write.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Candidate>> {
        let file: PoolFileIn = serde_json::from_slice(bytes)
            .with_context(|| format!("Failed to parse pool file {}", self.path.display()))?;

        match file {
            PoolFileIn::Versioned { version, candidates } => {
                if version > POOL_FILE_VERSION {
                    bail!(
                        "Pool file {} has version {}, newest supported is {}",
                        self.path.display(),
                        version,
                        POOL_FILE_VERSION
                    );
                }
                Ok(candidates)
            }
            PoolFileIn::Legacy(candidates) => {
                info!(
                    "Pool file {} uses the unversioned layout; it will be upgraded on next write",
                    self.path.display()
                );
                Ok(candidates)
            }
        }
    }

    /// `<file>.unreadable-<timestamp>`, so earlier set-asides are never clobbered.
    fn unreadable_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".unreadable-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl PoolStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<Candidate>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No pool file at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read pool file {}", self.path.display()))
            }
        };

        match self.decode(&bytes) {
            Ok(candidates) => Ok(candidates),
            Err(e) => {
                // keep the secrets recoverable; the next save would overwrite them
                let aside = self.unreadable_path();
                tokio::fs::rename(&self.path, &aside).await.with_context(|| {
                    format!("{:#}; failed to move pool file aside to {}", e, aside.display())
                })?;
                warn!("Moved unreadable pool file {} to {}", self.path.display(), aside.display());
                Err(e.context(format!("Unreadable pool file moved to {}", aside.display())))
            }
        }
    }

    async fn save(&self, candidates: &[Candidate]) -> Result<()> {
        let json = serde_json::to_vec_pretty(&PoolFileOut {
            version: POOL_FILE_VERSION,
            candidates,
        })
        .context("Failed to serialize pool")?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create pool directory {}", parent.display()))?;
        }

        let temp = self.temp_path();
        // a stale temp file would keep its old permissions
        match tokio::fs::remove_file(&temp).await {
            Ok(()) => debug!("Removed stale {}", temp.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove stale {}", temp.display())),
        }
        write_private(&temp, &json).await?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to replace pool file {}", self.path.display()))?;

        debug!("Saved {} candidates to {}", candidates.len(), self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Write `bytes` to a fresh owner-only file and flush it to disk.
async fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    Ok(())
}

/// In-process store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    candidates: Mutex<Vec<Candidate>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `candidates`.
    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates: Mutex::new(candidates),
            saves: Mutex::new(0),
        }
    }

    pub async fn snapshot(&self) -> Vec<Candidate> {
        self.candidates.lock().await.clone()
    }

    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl PoolStore for MemoryStore {
    async fn load(&self) -> Result<Vec<Candidate>> {
        Ok(self.candidates.lock().await.clone())
    }

    async fn save(&self, candidates: &[Candidate]) -> Result<()> {
        *self.candidates.lock().await = candidates.to_vec();
        *self.saves.lock().await += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
