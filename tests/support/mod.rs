#![allow(dead_code)]

use anyhow::Result;
use http::StatusCode;
use tempfile::TempDir;

use httpcache_disk::cache::{
    CachedResource, DiskCache, DiskCacheConfig, HeaderFields, MemoryCache, MetadataRecord,
};

/// A cache under test together with whatever keeps its storage alive.
pub struct Harness<C> {
    pub cache: C,
    pub dir: Option<TempDir>,
}

pub async fn memory_harness() -> Result<Harness<MemoryCache>> {
    Ok(Harness {
        cache: MemoryCache::new(),
        dir: None,
    })
}

pub async fn disk_harness() -> Result<Harness<DiskCache>> {
    let dir = TempDir::new()?;
    let cache = DiskCache::open(&DiskCacheConfig::new(dir.path())).await?;
    Ok(Harness {
        cache,
        dir: Some(dir),
    })
}

pub async fn disk_harness_with_limits(
    target_bytes: u64,
    max_bytes: u64,
) -> Result<Harness<DiskCache>> {
    let dir = TempDir::new()?;
    let config = DiskCacheConfig {
        dir: dir.path().to_path_buf(),
        target_bytes,
        max_bytes,
    };
    let cache = DiskCache::open(&config).await?;
    Ok(Harness {
        cache,
        dir: Some(dir),
    })
}

pub fn html_headers() -> HeaderFields {
    [("Content-Type", "text/html")].into_iter().collect()
}

pub fn html_resource(body: &str) -> CachedResource {
    CachedResource::from_bytes(StatusCode::OK, html_headers(), body.to_string())
}

/// Collects a retrieved resource into its metadata and body text.
pub async fn read_resource(resource: CachedResource) -> Result<(MetadataRecord, String)> {
    let (record, body) = resource.into_bytes().await?;
    Ok((record, String::from_utf8(body.to_vec())?))
}
