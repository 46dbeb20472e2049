use std::io;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use super::two_part::{PartError, TwoPartStore};
use super::{CacheError, CachedResource, MetadataRecord, ResourceCache};
use crate::engine::{
    BlobError, BlobStore, DEFAULT_MAX_BYTES, DEFAULT_TARGET_BYTES, DiskEngine, EngineLimits,
    EngineStats,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCacheConfig {
    pub dir: PathBuf,
    pub target_bytes: u64,
    pub max_bytes: u64,
}

impl DiskCacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            target_bytes: DEFAULT_TARGET_BYTES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn limits(&self) -> EngineLimits {
        EngineLimits {
            target_bytes: self.target_bytes,
            max_bytes: self.max_bytes,
        }
    }
}

/// [`ResourceCache`] backed by a blob store, by default the on-disk engine.
#[derive(Debug)]
pub struct DiskCache<S = DiskEngine> {
    store: TwoPartStore<S>,
}

impl DiskCache<DiskEngine> {
    pub async fn open(config: &DiskCacheConfig) -> Result<Self> {
        let engine = DiskEngine::open(config.dir.clone(), config.limits()).await?;
        Ok(Self::new(engine))
    }

    pub fn stats(&self) -> EngineStats {
        self.store.blobs().stats()
    }
}

impl<S: BlobStore> DiskCache<S> {
    pub fn new(blobs: S) -> Self {
        Self {
            store: TwoPartStore::new(blobs),
        }
    }

    pub fn blobs(&self) -> &S {
        self.store.blobs()
    }
}

impl From<PartError> for CacheError {
    fn from(err: PartError) -> Self {
        match err {
            PartError::Missing(_) => CacheError::NotFoundInCache,
            PartError::Decode(err) => CacheError::Decode(err),
            PartError::Blob(BlobError::Io(err)) => CacheError::Io(err),
            PartError::Blob(err) => CacheError::Io(io::Error::other(err)),
        }
    }
}

#[async_trait]
impl<S: BlobStore> ResourceCache for DiskCache<S> {
    async fn header(&self, key: &str) -> Result<MetadataRecord, CacheError> {
        Ok(self.store.header(key).await?)
    }

    async fn store(&self, resource: CachedResource, keys: &[&str]) -> Result<(), CacheError> {
        let result = self.store.store(resource, keys).await;
        crate::metrics::record_cache_store(result.is_ok());
        Ok(result?)
    }

    async fn retrieve(&self, key: &str) -> Result<CachedResource, CacheError> {
        let result = self.store.retrieve(key).await;
        crate::metrics::record_cache_lookup(result.is_ok());
        Ok(result?)
    }

    async fn invalidate(&self, keys: &[&str]) {
        self.store.invalidate(keys).await;
        crate::metrics::record_cache_invalidations(keys.len());
    }

    async fn freshen(&self, resource: CachedResource, keys: &[&str]) -> Result<(), CacheError> {
        let result = self.store.freshen(resource, keys).await;
        crate::metrics::record_cache_store(result.is_ok());
        Ok(result?)
    }
}
