//! Capacity-bounded blob storage on local disk.
//!
//! Blobs are opaque byte streams addressed by short lowercase keys. The
//! engine keeps an in-memory LRU index of what is on disk and evicts the
//! least recently used blobs once the hard byte bound is crossed, down to the
//! soft target.

use std::path::PathBuf;
use std::pin::Pin;

use anyhow::{Result, anyhow, ensure};
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::task;
use tracing::{info, trace, warn};

mod index;
mod maintenance;
mod store;
mod writer;

use index::BlobIndex;
use maintenance::{prepare_versioned_dir, scan_blobs, spawn_dir_cleanup};
use store::{BlobPaths, validate_key};
use writer::BlobWriter;

pub const DEFAULT_TARGET_BYTES: u64 = 7 * 1024 * 1024 * 1024;
pub const DEFAULT_MAX_BYTES: u64 = 8 * 1024 * 1024 * 1024;

pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob {key} not found")]
    NotFound { key: String },
    #[error("invalid blob key {key:?}")]
    InvalidKey { key: String },
    #[error("blob {key} is {size} bytes, more than the {limit} byte capacity")]
    TooLarge { key: String, size: u64, limit: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }

    fn from_open(key: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            BlobError::NotFound {
                key: key.to_string(),
            }
        } else {
            BlobError::Io(err)
        }
    }
}

/// Key-value storage of opaque blobs.
///
/// Implementations must allow concurrent calls on independent keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Opens a blob as a plain byte stream.
    async fn get(&self, key: &str) -> Result<BlobReader, BlobError> {
        let file = self.get_file(key).await?;
        Ok(Box::pin(file))
    }

    /// Opens a blob as a seekable file.
    async fn get_file(&self, key: &str) -> Result<File, BlobError>;

    /// Stores everything read from `source` under `key`, replacing any
    /// previous blob. Returns the number of bytes stored.
    async fn put(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, BlobError>;

    /// Like [`BlobStore::put`], but eviction caused by this write spares the
    /// blobs named in `keep`. Stores without eviction ignore `keep`.
    async fn put_keeping(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        _keep: &[&str],
    ) -> Result<u64, BlobError> {
        self.put(key, source).await
    }

    /// Deletes a blob. Returns `Ok(false)` if there was nothing to delete.
    async fn remove(&self, key: &str) -> Result<bool, BlobError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Size the engine evicts down to once `max_bytes` is exceeded.
    pub target_bytes: u64,
    /// Hard bound on the total size of stored blobs.
    pub max_bytes: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            target_bytes: DEFAULT_TARGET_BYTES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl EngineLimits {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.target_bytes > 0,
            "cache target size must be greater than 0"
        );
        ensure!(
            self.target_bytes <= self.max_bytes,
            "cache target size {} exceeds the hard bound {}",
            self.target_bytes,
            self.max_bytes
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub blobs: usize,
    pub bytes_in_use: u64,
    pub target_bytes: u64,
    pub max_bytes: u64,
}

#[derive(Debug)]
pub struct DiskEngine {
    index: Mutex<BlobIndex>,
    paths: BlobPaths,
    limits: EngineLimits,
}

impl DiskEngine {
    pub async fn open(root: PathBuf, limits: EngineLimits) -> Result<Self> {
        limits.validate()?;
        let (disk_dir, cleanup_dirs) = prepare_versioned_dir(&root).await?;
        spawn_dir_cleanup(cleanup_dirs);

        let paths = BlobPaths::new(disk_dir);
        let restored = {
            let paths = paths.clone();
            task::spawn_blocking(move || scan_blobs(&paths))
        }
        .await
        .map_err(|err| anyhow!("cache rebuild task failed: {err}"))??;

        let engine = Self {
            index: Mutex::new(BlobIndex::new(limits)),
            paths,
            limits,
        };
        let mut evicted = Vec::new();
        {
            let mut guard = engine.index.lock();
            guard.reset();
            for blob in restored {
                evicted.extend(guard.insert(blob.key, blob.size, &[]));
            }
        }
        let evicted_total = evicted.len();
        engine.remove_evicted_files(evicted).await;

        let stats = engine.stats();
        info!(
            dir = %engine.paths.disk_dir().display(),
            blobs = stats.blobs,
            bytes_in_use = stats.bytes_in_use,
            evicted = evicted_total,
            "disk cache opened"
        );
        Ok(engine)
    }

    pub fn stats(&self) -> EngineStats {
        let guard = self.index.lock();
        EngineStats {
            blobs: guard.len(),
            bytes_in_use: guard.bytes_in_use(),
            target_bytes: self.limits.target_bytes,
            max_bytes: self.limits.max_bytes,
        }
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    #[cfg(test)]
    pub(crate) fn blob_path(&self, key: &str) -> PathBuf {
        self.paths.blob_path(key)
    }

    /// Deletes the files of blobs already dropped from the index. Runs with
    /// the index unlocked.
    async fn remove_evicted_files(&self, evicted: Vec<(String, u64)>) {
        for (key, size) in evicted {
            crate::metrics::record_cache_eviction();
            trace!(key = %key, size, "evicting blob");
            if let Err(err) = self.paths.remove_blob_file(&key).await {
                warn!(error = %err, key = %key, "failed to remove evicted blob");
            }
        }
    }
}

#[async_trait]
impl BlobStore for DiskEngine {
    async fn get_file(&self, key: &str) -> Result<File, BlobError> {
        validate_key(key)?;
        let generation = self.index.lock().touch(key);
        let Some(generation) = generation else {
            return Err(BlobError::NotFound {
                key: key.to_string(),
            });
        };
        match File::open(self.paths.blob_path(key)).await {
            Ok(file) => Ok(file),
            Err(err) => {
                let err = BlobError::from_open(key, err);
                if err.is_not_found() {
                    warn!(key = %key, "indexed blob missing on disk");
                    // A put that raced the open has a newer generation and stays.
                    self.index.lock().remove_generation(key, generation);
                }
                Err(err)
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, BlobError> {
        self.put_keeping(key, source, &[]).await
    }

    async fn put_keeping(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        keep: &[&str],
    ) -> Result<u64, BlobError> {
        validate_key(key)?;
        let final_path = self.paths.blob_path(key);
        if let Some(shard_dir) = final_path.parent() {
            tokio::fs::create_dir_all(shard_dir).await?;
        }

        let mut writer = BlobWriter::create(self.paths.temp_path(), self.limits.max_bytes).await?;
        tokio::io::copy(source, &mut writer).await?;
        writer.sync().await?;
        if writer.oversized() {
            return Err(BlobError::TooLarge {
                key: key.to_string(),
                size: writer.written(),
                limit: self.limits.max_bytes,
            });
        }
        let size = writer.written();
        let temp_path = writer.keep();

        if let Err(err) = tokio::fs::rename(&temp_path, &final_path).await {
            tokio::fs::remove_file(&temp_path).await.ok();
            return Err(err.into());
        }
        let evicted = self.index.lock().insert(key.to_string(), size, keep);
        self.remove_evicted_files(evicted).await;

        trace!(key = %key, size, "stored blob");
        Ok(size)
    }

    async fn remove(&self, key: &str) -> Result<bool, BlobError> {
        validate_key(key)?;
        let indexed = self.index.lock().remove(key).is_some();
        let existed = self.paths.remove_blob_file(key).await?;
        Ok(indexed || existed)
    }
}
