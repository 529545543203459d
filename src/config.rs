//! Upload configuration and defaults.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default chunk size: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default maximum file size: 5 GiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Default retry budget per operation, beyond the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default base delay unit for linear backoff.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Immutable configuration for one upload.
///
/// [`UploadConfig::new`] fills every optional field with the documented
/// default; callers override fields directly before handing the config to
/// the uploader.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Target bucket name.
    pub bucket: String,
    /// Public AWS access key id. The matching secret stays on the signing
    /// backend; the client only ever sees per-request signatures.
    pub access_key_id: String,
    /// Base URL of the signing backend.
    pub signature_backend: String,
    /// Storage host, e.g. `https://<bucket>.s3.amazonaws.com`.
    pub host: String,
    /// Object key. When `None`, a key of the form
    /// `/<bucket>/<epoch_millis>_<file_name>` is generated at upload start.
    pub key: Option<String>,
    /// MIME type sent with part and completion requests. When `None`, the
    /// file source's reported type is used, falling back to
    /// `application/octet-stream`.
    pub content_type: Option<String>,
    /// Size of each uploaded part in bytes.
    pub chunk_size: u64,
    /// Request AES256 server-side encryption on initiation.
    pub encrypted: bool,
    /// Retries permitted per operation beyond the initial attempt.
    pub max_retries: u32,
    /// Uploads of files larger than this fail validation.
    pub max_file_size: u64,
    /// Canned ACL passed through on initiation.
    pub acl: String,
    /// Base delay unit for linear backoff (`attempt * retry_delay`).
    pub retry_delay: Duration,
    /// Enables per-chunk debug logging.
    pub log: bool,
}

impl UploadConfig {
    /// Creates a configuration with defaults for everything but the
    /// bucket, access key id and signing backend URL.
    pub fn new(bucket: &str, access_key_id: &str, signature_backend: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            access_key_id: access_key_id.to_string(),
            signature_backend: signature_backend.trim_end_matches('/').to_string(),
            host: format!("https://{bucket}.s3.amazonaws.com"),
            key: None,
            content_type: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            encrypted: false,
            max_retries: DEFAULT_MAX_RETRIES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            acl: "public-read".to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            log: false,
        }
    }

    /// Resolves the object key for this upload, generating the default
    /// timestamped key when none was configured.
    pub(crate) fn object_key(&self, file_name: &str) -> String {
        match &self.key {
            Some(key) => key.clone(),
            None => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis();
                format!("/{}/{}_{}", self.bucket, millis, file_name)
            }
        }
    }

    /// Resolves the content type against the source's reported type.
    pub(crate) fn resolved_content_type(&self, source_type: Option<&str>) -> String {
        self.content_type
            .clone()
            .or_else(|| source_type.map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }

    /// Joins the storage host and object key into a request URL.
    pub(crate) fn object_url(&self, key: &str) -> String {
        if key.starts_with('/') {
            format!("{}{}", self.host, key)
        } else {
            format!("{}/{}", self.host, key)
        }
    }
}
