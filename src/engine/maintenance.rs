use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tokio::fs as async_fs;
use tracing::{trace, warn};

use super::store::{BlobPaths, is_valid_key};

const LAYOUT_VERSION: u32 = 1;
const VERSION_PREFIX: &str = "v";
const TOMBSTONE_PREFIX: &str = "tombstone-";

/// A blob found on disk while rebuilding the index.
#[derive(Debug)]
pub(super) struct RestoredBlob {
    pub key: String,
    pub size: u64,
    pub modified: SystemTime,
}

pub(super) fn version_dir(root: &Path) -> PathBuf {
    root.join(version_dir_name())
}

fn parse_version(name: &str) -> Option<u32> {
    let version = name.strip_prefix(VERSION_PREFIX)?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    version.parse().ok()
}

/// What a directory directly under the cache root is.
#[derive(Debug, PartialEq, Eq)]
enum RootEntry {
    Active,
    Tombstone,
    Stale,
    Foreign,
}

fn classify(name: &str) -> RootEntry {
    if name.starts_with(TOMBSTONE_PREFIX) {
        return RootEntry::Tombstone;
    }
    match parse_version(name) {
        Some(LAYOUT_VERSION) if name == version_dir_name() => RootEntry::Active,
        Some(_) => RootEntry::Stale,
        None => RootEntry::Foreign,
    }
}

fn version_dir_name() -> String {
    format!("{VERSION_PREFIX}{LAYOUT_VERSION}")
}

/// Creates the active layout directory under `root` and tombstones any other
/// layout versions. Returns the active directory and the directories that
/// should be deleted.
pub(super) async fn prepare_versioned_dir(root: &Path) -> Result<(PathBuf, Vec<PathBuf>)> {
    let active = version_dir(root);
    async_fs::create_dir_all(&active)
        .await
        .with_context(|| format!("failed to create cache dir {}", active.display()))?;

    let mut doomed = Vec::new();
    let mut dir = async_fs::read_dir(root).await?;
    while let Some(entry) = dir.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let path = entry.path();
        match classify(&entry.file_name().to_string_lossy()) {
            RootEntry::Active | RootEntry::Foreign => {}
            RootEntry::Tombstone => doomed.push(path),
            RootEntry::Stale => {
                let version = entry.file_name().to_string_lossy().into_owned();
                let tombstone = root.join(format!(
                    "{TOMBSTONE_PREFIX}{version}-{}",
                    uuid::Uuid::new_v4()
                ));
                match async_fs::rename(&path, &tombstone).await {
                    Ok(()) => doomed.push(tombstone),
                    Err(err) => warn!(
                        error = %err,
                        path = %path.display(),
                        "could not retire old layout dir"
                    ),
                }
            }
        }
    }

    Ok((active, doomed))
}

pub(super) fn spawn_dir_cleanup(dirs: Vec<PathBuf>) {
    for dir in dirs {
        tokio::spawn(async move {
            match async_fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    crate::metrics::record_cache_cleanup_dir();
                    trace!(path = %dir.display(), "removed old cache dir");
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        error = %err,
                        path = %dir.display(),
                        "failed to remove old cache dir"
                    );
                }
            }
        });
    }
}

/// Walks the shard directories and returns every well-formed blob, oldest
/// first. Stray files and empty shards are removed along the way.
pub(super) fn scan_blobs(paths: &BlobPaths) -> Result<Vec<RestoredBlob>> {
    paths.remove_temp_files()?;

    let mut restored = Vec::new();
    for shard1 in fs::read_dir(paths.disk_dir())? {
        let shard1 = shard1?;
        if !shard1.file_type()?.is_dir() {
            continue;
        }
        for shard2 in fs::read_dir(shard1.path())? {
            let shard2 = shard2?;
            if !shard2.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard2.path())? {
                let entry = entry?;
                let path = entry.path();
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let key = match path.file_name().and_then(|n| n.to_str()) {
                    Some(name) if is_valid_key(name) && paths.blob_path(name) == path => {
                        name.to_string()
                    }
                    _ => {
                        warn!(path = %path.display(), "removing stray file from cache dir");
                        fs::remove_file(&path).ok();
                        continue;
                    }
                };
                let metadata = entry.metadata()?;
                restored.push(RestoredBlob {
                    key,
                    size: metadata.len(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
            if fs::read_dir(shard2.path())?.next().is_none() {
                fs::remove_dir(shard2.path()).ok();
            }
        }
        if fs::read_dir(shard1.path())?.next().is_none() {
            fs::remove_dir(shard1.path()).ok();
        }
    }

    restored.sort_by_key(|blob| blob.modified);
    Ok(restored)
}
