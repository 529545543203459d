use serde::Deserialize;

/// A contiguous byte range of the source file, uploaded as one part.
///
/// Ranges are half-open: a chunk covers `[start, end)` and the body sent
/// for it is exactly `end - start` bytes. Part numbers are 1-indexed and
/// dense, matching the S3 multipart protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 1-indexed part number.
    pub number: u32,
    /// First byte offset of the range.
    pub start: u64,
    /// One past the last byte offset of the range.
    pub end: u64,
}

impl Chunk {
    /// Number of bytes this chunk transfers.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` for a zero-length range.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Current state of an upload.
///
/// `Completed`, `Cancelled` and `Failed` are terminal: once reached, no
/// further transitions, retries or notifications are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Ready,
    Uploading,
    Completed,
    Cancelled,
    Failed,
}

impl UploadStatus {
    /// Returns `true` once the upload can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Cancelled | UploadStatus::Failed
        )
    }
}

/// A signature and its request date, as issued by the signing backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Signature {
    pub signature: String,
    pub date: String,
}

/// One `Part` entry from the store's authoritative part listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePart {
    pub part_number: u32,
    /// ETag with surrounding quotes already stripped.
    pub etag: String,
    pub size: u64,
}
