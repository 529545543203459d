//! Multipart upload engine for S3-compatible object stores.
//!
//! The engine splits a file into fixed-size chunks, uploads them
//! concurrently and assembles the final object, while a separate signing
//! backend holds the AWS credentials and issues per-request signatures.
//! The client never sees the secret key.
//!
//! Pipeline for one upload: validate the file, fetch the init signature,
//! initiate the multipart upload, fetch the per-chunk signatures, PUT every
//! chunk in parallel with per-chunk retry budgets, reconcile the store's
//! part listing against local state (re-uploading any part the store lost
//! or corrupted), then send the completion request.
//!
//! ```no_run
//! use std::sync::Arc;
//! use s3_multipart_client::{
//!     HttpTransport, LocalFile, NoopNotify, UploadConfig, Uploader,
//! };
//!
//! # async fn demo() -> std::io::Result<()> {
//! let config = UploadConfig::new("my-bucket", "AKIA...", "https://sign.example.com");
//! let source = Arc::new(LocalFile::open("video.mp4").await?);
//! let uploader = Uploader::new(
//!     config,
//!     source,
//!     Arc::new(HttpTransport::new()),
//!     Arc::new(NoopNotify),
//! );
//! uploader.start_upload().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod notify;
pub mod planner;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod signing;
pub mod source;
pub mod transport;
pub mod types;
pub mod uploader;

pub use config::UploadConfig;
pub use error::UploadError;
pub use notify::{NoopNotify, UploadNotify};
pub use source::{FileSource, LocalFile};
pub use transport::{HttpTransport, Transport};
pub use types::UploadStatus;
pub use uploader::Uploader;
