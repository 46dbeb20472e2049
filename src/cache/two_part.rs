use std::fmt;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{trace, warn};

use super::codec::{self, DecodeError};
use super::key::StorageKeys;
use super::{CachedResource, MetadataRecord};
use crate::engine::{BlobError, BlobStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Metadata,
    Body,
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Part::Metadata => f.write_str("metadata"),
            Part::Body => f.write_str("body"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PartError {
    #[error("{0} blob missing")]
    Missing(Part),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// Stores each cache entry as a metadata blob and a body blob under the two
/// keys derived from its logical key.
///
/// Bodies are streamed, never buffered. There is no locking: concurrent
/// writers of the same logical key race blob by blob.
#[derive(Debug)]
pub struct TwoPartStore<S> {
    blobs: S,
}

impl<S: BlobStore> TwoPartStore<S> {
    pub fn new(blobs: S) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &S {
        &self.blobs
    }

    pub async fn header(&self, key: &str) -> Result<MetadataRecord, PartError> {
        let pair = StorageKeys::derive(key);
        let data = self.read_metadata(&pair).await?;
        self.decode_or_drop(key, &pair, &data).await
    }

    /// For each key in turn: drops the old metadata, writes the body, then
    /// writes the new metadata. The body stream is consumed by the first key;
    /// later keys copy the stored blob.
    ///
    /// Stops at the first failed write. A key whose write failed reads as a
    /// miss. Keys written before the failure stay stored.
    pub async fn store(&self, resource: CachedResource, keys: &[&str]) -> Result<(), PartError> {
        let (record, mut body) = resource.into_parts();
        let encoded = codec::encode(&record);

        let mut first_body: Option<String> = None;
        for key in keys {
            let pair = StorageKeys::derive(key);
            // The metadata blob commits an entry, so it goes first and comes back last.
            self.blobs.remove(&pair.metadata).await?;
            let mut keep = vec![pair.body.as_str()];
            let size = match &first_body {
                None => self.blobs.put(&pair.body, &mut body).await?,
                Some(source) => {
                    keep.push(source.as_str());
                    let mut file = self.blobs.get_file(source).await?;
                    self.blobs.put_keeping(&pair.body, &mut file, &keep).await?
                }
            };
            self.blobs
                .put_keeping(&pair.metadata, &mut &encoded[..], &keep)
                .await?;
            trace!(key = %key, status = record.status.as_u16(), size, "stored cache entry");
            if first_body.is_none() {
                first_body = Some(pair.body);
            }
        }
        Ok(())
    }

    /// Opens both halves of an entry. If either half is gone the other is
    /// removed as well and the entry is reported missing.
    pub async fn retrieve(&self, key: &str) -> Result<CachedResource, PartError> {
        let pair = StorageKeys::derive(key);

        let data = match self.read_metadata(&pair).await {
            Ok(data) => data,
            Err(PartError::Missing(part)) => {
                self.remove_orphan(key, &pair.body, Part::Body).await;
                return Err(PartError::Missing(part));
            }
            Err(err) => return Err(err),
        };

        let body = match self.blobs.get_file(&pair.body).await {
            Ok(file) => file,
            Err(err) if err.is_not_found() => {
                self.remove_orphan(key, &pair.metadata, Part::Metadata)
                    .await;
                return Err(PartError::Missing(Part::Body));
            }
            Err(err) => return Err(err.into()),
        };

        let record = self.decode_or_drop(key, &pair, &data).await?;
        Ok(CachedResource::from_record(record, body))
    }

    pub async fn invalidate(&self, keys: &[&str]) {
        for key in keys {
            let pair = StorageKeys::derive(key);
            self.remove_pair(key, &pair).await;
            trace!(key = %key, "invalidated cache entry");
        }
    }

    /// Drops whatever is stored under `keys` and stores `resource` in its
    /// place. The two steps are not atomic.
    pub async fn freshen(&self, resource: CachedResource, keys: &[&str]) -> Result<(), PartError> {
        self.invalidate(keys).await;
        self.store(resource, keys).await
    }

    async fn read_metadata(&self, pair: &StorageKeys) -> Result<Vec<u8>, PartError> {
        let mut reader = match self.blobs.get(&pair.metadata).await {
            Ok(reader) => reader,
            Err(err) if err.is_not_found() => return Err(PartError::Missing(Part::Metadata)),
            Err(err) => return Err(err.into()),
        };
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(BlobError::from)?;
        Ok(data)
    }

    async fn decode_or_drop(
        &self,
        key: &str,
        pair: &StorageKeys,
        data: &[u8],
    ) -> Result<MetadataRecord, PartError> {
        match codec::decode(data) {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(key = %key, error = %err, "dropping cache entry with corrupt metadata");
                crate::metrics::record_cache_decode_error();
                self.remove_pair(key, pair).await;
                Err(err.into())
            }
        }
    }

    async fn remove_orphan(&self, key: &str, blob_key: &str, part: Part) {
        match self.blobs.remove(blob_key).await {
            Ok(true) => {
                warn!(key = %key, part = %part, "removed orphaned cache blob");
                crate::metrics::record_cache_self_heal();
            }
            Ok(false) => {}
            Err(err) => {
                warn!(
                    key = %key,
                    part = %part,
                    error = %err,
                    "failed to remove orphaned cache blob"
                );
            }
        }
    }

    async fn remove_pair(&self, key: &str, pair: &StorageKeys) {
        for (blob_key, part) in [(&pair.metadata, Part::Metadata), (&pair.body, Part::Body)] {
            if let Err(err) = self.blobs.remove(blob_key).await {
                warn!(key = %key, part = %part, error = %err, "failed to remove cache blob");
            }
        }
    }
}
