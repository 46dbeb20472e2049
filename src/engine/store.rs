use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;

use super::BlobError;

pub(super) const TEMP_PREFIX: &str = "tmp_";
const MIN_KEY_LEN: usize = 4;

#[derive(Debug, Clone)]
pub(super) struct BlobPaths {
    disk_dir: PathBuf,
}

impl BlobPaths {
    pub(super) fn new(disk_dir: PathBuf) -> Self {
        Self { disk_dir }
    }

    pub(super) fn disk_dir(&self) -> &Path {
        &self.disk_dir
    }

    pub(super) fn blob_path(&self, key: &str) -> PathBuf {
        let (first, remainder) = key.split_at(2);
        let (second, _) = remainder.split_at(2);
        self.disk_dir.join(first).join(second).join(key)
    }

    pub(super) fn temp_path(&self) -> PathBuf {
        self.disk_dir
            .join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    pub(super) fn remove_temp_files(&self) -> Result<usize> {
        if !self.disk_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.disk_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| name.starts_with(TEMP_PREFIX))
                    .unwrap_or(false)
                && fs::remove_file(&path).is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deletes the file for `key`. Returns false if it was already gone.
    pub(super) async fn remove_blob_file(&self, key: &str) -> std::io::Result<bool> {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

pub(super) fn is_valid_key(key: &str) -> bool {
    key.len() >= MIN_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
}

pub(super) fn validate_key(key: &str) -> Result<(), BlobError> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(BlobError::InvalidKey {
            key: key.to_string(),
        })
    }
}
