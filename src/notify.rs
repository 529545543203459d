//! Upload event notifications.

/// Observer interface for upload lifecycle events.
///
/// The presentation layer (progress bars, UI state) implements this; every
/// method defaults to a no-op so implementors subscribe only to the events
/// they care about. Callbacks are invoked from the upload's tasks and must
/// not block.
pub trait UploadNotify: Send + Sync {
    /// The uploader has been constructed and is ready to start.
    fn on_ready(&self) {}

    /// The upload passed validation and is starting its protocol sequence.
    fn on_start(&self) {}

    /// Aggregated bytes sent so far, out of the total file size.
    fn on_progress(&self, loaded: u64, total: u64) {
        let _ = (loaded, total);
    }

    /// The object was assembled; `location` is its final URL.
    fn on_complete(&self, location: &str) {
        let _ = location;
    }

    /// The upload failed. Cancellation fires [`UploadNotify::on_cancel`]
    /// instead, never this.
    fn on_error(&self, message: &str) {
        let _ = message;
    }

    /// A retry was scheduled; `attempt` is the new attempt number for the
    /// operation being retried.
    fn on_retry(&self, attempt: u32) {
        let _ = attempt;
    }

    /// The upload was cancelled.
    fn on_cancel(&self) {}
}

/// Notification sink that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotify;

impl UploadNotify for NoopNotify {}
