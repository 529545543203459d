//! Byte-range file reading seam.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Number of leading bytes the readability probe reads.
const PROBE_BYTES: u64 = 1024;

/// Abstract source of the bytes being uploaded.
///
/// Implemented by [`LocalFile`] for on-disk files; tests use in-memory
/// sources. Ranges are half-open, matching [`crate::types::Chunk`].
pub trait FileSource: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// File name used for `Content-Disposition` and default keys.
    fn name(&self) -> &str;

    /// MIME type reported by the source, if it knows one.
    fn content_type(&self) -> Option<&str> {
        None
    }

    /// Reads the bytes in `[start, end)`.
    fn read_range(
        &self,
        start: u64,
        end: u64,
    ) -> Pin<Box<dyn Future<Output = io::Result<Vec<u8>>> + Send + '_>>;

    /// Readability probe run before an upload starts: reads the first
    /// [`PROBE_BYTES`] bytes (or the whole file if smaller) and discards
    /// them.
    fn probe(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.read_range(0, self.size().min(PROBE_BYTES)).await?;
            Ok(())
        })
    }
}

/// A file on the local filesystem, read through `tokio::fs`.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
}

impl LocalFile {
    /// Captures the file's metadata. The file is re-opened for every range
    /// read, so concurrent chunk reads never contend on one file handle.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path,
            name,
            size: metadata.len(),
        })
    }
}

impl FileSource for LocalFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_range(
        &self,
        start: u64,
        end: u64,
    ) -> Pin<Box<dyn Future<Output = io::Result<Vec<u8>>> + Send + '_>> {
        Box::pin(async move {
            let len = end.saturating_sub(start) as usize;
            let mut file = File::open(&self.path).await?;
            file.seek(SeekFrom::Start(start)).await?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf).await?;
            Ok(buf)
        })
    }
}
