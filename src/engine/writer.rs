use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use tokio::fs as async_fs;
use tokio::fs::File as AsyncFile;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Streams a blob into a temp file, tracking its size against a byte limit.
///
/// Writes past the limit are swallowed and the writer is marked oversized so
/// the caller can discard the temp file instead of committing it. The temp
/// file is removed on drop unless [`BlobWriter::keep`] was called.
pub(super) struct BlobWriter {
    file: AsyncFile,
    temp_path: PathBuf,
    limit: u64,
    written: u64,
    oversized: bool,
    kept: bool,
}

impl BlobWriter {
    pub(super) async fn create(temp_path: PathBuf, limit: u64) -> std::io::Result<Self> {
        let mut options = async_fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let file = options.open(&temp_path).await?;
        Ok(Self {
            file,
            temp_path,
            limit,
            written: 0,
            oversized: false,
            kept: false,
        })
    }

    #[cfg(test)]
    pub(super) fn temp_path(&self) -> &std::path::Path {
        &self.temp_path
    }

    pub(super) fn written(&self) -> u64 {
        self.written
    }

    pub(super) fn oversized(&self) -> bool {
        self.oversized
    }

    pub(super) async fn sync(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }

    /// Hands ownership of the temp file to the caller, who is expected to
    /// rename or delete it.
    pub(super) fn keep(mut self) -> PathBuf {
        self.kept = true;
        self.temp_path.clone()
    }
}

impl AsyncWrite for BlobWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let incoming = buf.len() as u64;
        if self.oversized || self.written.saturating_add(incoming) > self.limit {
            self.oversized = true;
            self.written = self.written.saturating_add(incoming);
            return Poll::Ready(Ok(buf.len()));
        }

        let poll = Pin::new(&mut self.file).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.written += *n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if !self.kept {
            std::fs::remove_file(&self.temp_path).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    #[tokio::test]
    async fn counts_bytes_written_to_the_temp_file() -> Result<()> {
        let dir = TempDir::new()?;
        let mut writer = BlobWriter::create(dir.path().join("tmp_a"), 1024).await?;
        writer.write_all(b"some body").await?;
        writer.sync().await?;
        assert_eq!(writer.written(), 9);
        assert!(!writer.oversized());

        let path = writer.keep();
        assert_eq!(std::fs::read(&path)?, b"some body");
        Ok(())
    }

    #[tokio::test]
    async fn flags_blobs_over_the_limit_without_writing_them() -> Result<()> {
        let dir = TempDir::new()?;
        let mut writer = BlobWriter::create(dir.path().join("tmp_b"), 4).await?;
        writer.write_all(b"abc").await?;
        writer.write_all(b"defgh").await?;
        writer.sync().await?;
        assert!(writer.oversized());
        assert_eq!(writer.written(), 8);
        assert_eq!(std::fs::read(writer.temp_path())?, b"abc");
        Ok(())
    }

    #[test]
    fn removes_temp_file_on_drop() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("tmp_c");
        let runtime = tokio::runtime::Runtime::new()?;
        let writer = runtime.block_on(BlobWriter::create(path.clone(), 16))?;
        drop(runtime);
        assert!(path.exists());
        drop(writer);
        assert!(!path.exists());
        Ok(())
    }
}
