//! Cached HTTP resources and the stores that keep them.
//!
//! A [`CachedResource`] is split into a small [`MetadataRecord`] and a body
//! stream. [`ResourceCache`] is the contract a caching policy layer talks to;
//! [`DiskCache`] persists through a [`BlobStore`](crate::engine::BlobStore)
//! and [`MemoryCache`] keeps everything in process.

use std::fmt;
use std::io::Cursor;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub mod codec;
pub mod disk;
pub mod key;
pub mod memory;
pub mod record;
pub mod two_part;

pub use codec::DecodeError;
pub use disk::{DiskCache, DiskCacheConfig};
pub use key::StorageKeys;
pub use memory::MemoryCache;
pub use record::{HeaderFields, MetadataRecord};
pub use two_part::{Part, PartError, TwoPartStore};

pub type Body = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("not found in cache")]
    NotFoundInCache,
    #[error("corrupt cache metadata: {0}")]
    Decode(#[from] DecodeError),
    #[error("cache storage failed: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::NotFoundInCache)
    }
}

/// A response as the cache sees it: metadata plus a body stream.
pub struct CachedResource {
    record: MetadataRecord,
    body: Body,
}

impl CachedResource {
    pub fn new<R>(status: StatusCode, headers: HeaderFields, body: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::from_record(MetadataRecord::new(status, headers), body)
    }

    pub fn from_record<R>(record: MetadataRecord, body: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            record,
            body: Box::pin(body),
        }
    }

    pub fn from_bytes(status: StatusCode, headers: HeaderFields, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, Cursor::new(body.into()))
    }

    pub fn status(&self) -> StatusCode {
        self.record.status
    }

    pub fn headers(&self) -> &HeaderFields {
        &self.record.headers
    }

    pub fn record(&self) -> &MetadataRecord {
        &self.record
    }

    pub fn into_parts(self) -> (MetadataRecord, Body) {
        (self.record, self.body)
    }

    /// Reads the whole body into memory.
    pub async fn into_bytes(self) -> std::io::Result<(MetadataRecord, Bytes)> {
        let (record, mut body) = self.into_parts();
        let mut buf = Vec::new();
        body.read_to_end(&mut buf).await?;
        Ok((record, Bytes::from(buf)))
    }
}

impl fmt::Debug for CachedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedResource")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Storage contract used by the caching policy layer.
///
/// A logical key names one cacheable response; `store` and `freshen` accept
/// several keys so one response can answer multiple aliases.
#[async_trait]
pub trait ResourceCache: Send + Sync {
    /// Returns the metadata stored under `key` without opening the body.
    async fn header(&self, key: &str) -> Result<MetadataRecord, CacheError>;

    /// Stores `resource` under every key in `keys`.
    async fn store(&self, resource: CachedResource, keys: &[&str]) -> Result<(), CacheError>;

    /// Returns the resource stored under `key`, or
    /// [`CacheError::NotFoundInCache`].
    async fn retrieve(&self, key: &str) -> Result<CachedResource, CacheError>;

    /// Removes every key in `keys`. Missing keys are ignored.
    async fn invalidate(&self, keys: &[&str]);

    /// Replaces whatever is stored under `keys` with `resource`.
    async fn freshen(&self, resource: CachedResource, keys: &[&str]) -> Result<(), CacheError>;
}
