use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use super::{CacheError, CachedResource, MetadataRecord, ResourceCache};

#[derive(Debug)]
struct StoredResource {
    record: MetadataRecord,
    body: Bytes,
}

/// In-process [`ResourceCache`]. Bodies are held in memory and entries are
/// never evicted, so it suits tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Arc<StoredResource>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn lookup(&self, key: &str) -> Option<Arc<StoredResource>> {
        self.entries.lock().get(key).cloned()
    }
}

#[async_trait]
impl ResourceCache for MemoryCache {
    async fn header(&self, key: &str) -> Result<MetadataRecord, CacheError> {
        self.lookup(key)
            .map(|stored| stored.record.clone())
            .ok_or(CacheError::NotFoundInCache)
    }

    async fn store(&self, resource: CachedResource, keys: &[&str]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let (record, body) = resource.into_bytes().await?;
        let stored = Arc::new(StoredResource { record, body });
        let mut entries = self.entries.lock();
        for key in keys {
            entries.insert((*key).to_string(), stored.clone());
        }
        trace!(keys = keys.len(), size = stored.body.len(), "stored cache entry in memory");
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<CachedResource, CacheError> {
        let stored = self.lookup(key).ok_or(CacheError::NotFoundInCache)?;
        Ok(CachedResource::from_bytes(
            stored.record.status,
            stored.record.headers.clone(),
            stored.body.clone(),
        ))
    }

    async fn invalidate(&self, keys: &[&str]) {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(*key);
        }
    }

    async fn freshen(&self, resource: CachedResource, keys: &[&str]) -> Result<(), CacheError> {
        self.invalidate(keys).await;
        self.store(resource, keys).await
    }
}
