//! Shared session state (thread-safe).
//!
//! All cross-task mutation of an upload (status, the ETag table, per-chunk
//! attempt counters and per-chunk progress) goes through this one
//! mutex-guarded struct, so concurrent chunk tasks never write unsynchronized
//! state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::types::UploadStatus;

/// Mutex-guarded state for one upload session.
pub struct SessionState {
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    status: UploadStatus,
    /// part number -> confirmed ETag (quotes already stripped).
    etags: BTreeMap<u32, String>,
    /// part number -> retries consumed by that chunk.
    attempts: HashMap<u32, u32>,
    /// part number -> bytes observed sent for that chunk's current attempt.
    progress: HashMap<u32, u64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Creates a session in the `Ready` state.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                status: UploadStatus::Ready,
                etags: BTreeMap::new(),
                attempts: HashMap::new(),
                progress: HashMap::new(),
            }),
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.inner.lock().unwrap().status
    }

    /// Attempts the single allowed transition into `to` and reports whether
    /// it was applied. Valid moves: `Ready -> Uploading | Failed`,
    /// `Uploading -> Completed | Cancelled | Failed`. Terminal states are
    /// sticky, which is what discards completions or failures racing a
    /// cancel.
    pub fn transition(&self, to: UploadStatus) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let allowed = match (inner.status, to) {
            (UploadStatus::Ready, UploadStatus::Uploading) => true,
            (UploadStatus::Ready, UploadStatus::Failed) => true,
            (UploadStatus::Uploading, UploadStatus::Completed) => true,
            (UploadStatus::Uploading, UploadStatus::Cancelled) => true,
            (UploadStatus::Uploading, UploadStatus::Failed) => true,
            _ => false,
        };
        if allowed {
            inner.status = to;
        }
        allowed
    }

    /// Records the confirmed ETag for a part and returns the table size
    /// afterwards. Callers compare the size against the chunk count to
    /// decide when reconciliation is due.
    pub fn record_etag(&self, part_number: u32, etag: String) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.etags.insert(part_number, etag);
        inner.etags.len()
    }

    /// Drops a part's ETag when the chunk is being re-submitted, so the
    /// table only reaches full size again once the store re-confirms it.
    pub fn remove_etag(&self, part_number: u32) {
        self.inner.lock().unwrap().etags.remove(&part_number);
    }

    pub fn etag(&self, part_number: u32) -> Option<String> {
        self.inner.lock().unwrap().etags.get(&part_number).cloned()
    }

    /// Snapshot of the ETag table, ordered by part number.
    pub fn etags(&self) -> BTreeMap<u32, String> {
        self.inner.lock().unwrap().etags.clone()
    }

    pub fn etag_count(&self) -> usize {
        self.inner.lock().unwrap().etags.len()
    }

    /// Retries consumed so far by the given chunk.
    pub fn attempts(&self, part_number: u32) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .attempts
            .get(&part_number)
            .copied()
            .unwrap_or(0)
    }

    /// Consumes one retry from the chunk's budget and returns the new
    /// attempt number.
    pub fn bump_attempts(&self, part_number: u32) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let attempts = inner.attempts.entry(part_number).or_insert(0);
        *attempts += 1;
        *attempts
    }

    /// Records the absolute number of bytes sent for a chunk's current
    /// attempt. Absolute rather than incremental so a restarted chunk
    /// simply overwrites its previous figure.
    pub fn record_progress(&self, part_number: u32, bytes: u64) {
        self.inner.lock().unwrap().progress.insert(part_number, bytes);
    }

    /// Total bytes sent, summed over every chunk's latest figure. Arrival
    /// order of per-chunk updates does not affect the sum.
    pub fn loaded(&self) -> u64 {
        self.inner.lock().unwrap().progress.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_ready() {
        let session = SessionState::new();
        assert_eq!(session.status(), UploadStatus::Ready);
    }

    #[test]
    fn valid_transitions() {
        let session = SessionState::new();
        assert!(session.transition(UploadStatus::Uploading));
        assert!(session.transition(UploadStatus::Completed));
        assert_eq!(session.status(), UploadStatus::Completed);
    }

    #[test]
    fn ready_can_fail_validation() {
        let session = SessionState::new();
        assert!(session.transition(UploadStatus::Failed));
        assert_eq!(session.status(), UploadStatus::Failed);
    }

    #[test]
    fn double_start_is_rejected() {
        let session = SessionState::new();
        assert!(session.transition(UploadStatus::Uploading));
        assert!(!session.transition(UploadStatus::Uploading));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let session = SessionState::new();
        session.transition(UploadStatus::Uploading);
        assert!(session.transition(UploadStatus::Cancelled));
        // Nothing that raced the cancel may transition afterwards.
        assert!(!session.transition(UploadStatus::Completed));
        assert!(!session.transition(UploadStatus::Failed));
        assert!(!session.transition(UploadStatus::Uploading));
        assert_eq!(session.status(), UploadStatus::Cancelled);
    }

    #[test]
    fn ready_cannot_complete_directly() {
        let session = SessionState::new();
        assert!(!session.transition(UploadStatus::Completed));
        assert!(!session.transition(UploadStatus::Cancelled));
    }

    #[test]
    fn etag_table_grows_and_reports_size() {
        let session = SessionState::new();
        assert_eq!(session.record_etag(2, "b".into()), 1);
        assert_eq!(session.record_etag(1, "a".into()), 2);
        // Re-recording a part replaces, not grows.
        assert_eq!(session.record_etag(2, "b2".into()), 2);
        assert_eq!(session.etag(2).as_deref(), Some("b2"));

        session.remove_etag(2);
        assert_eq!(session.etag_count(), 1);
        assert_eq!(session.record_etag(2, "b3".into()), 2);

        let etags = session.etags();
        assert_eq!(
            etags.keys().copied().collect::<Vec<_>>(),
            vec![1, 2],
            "snapshot must be ordered by part number"
        );
    }

    #[test]
    fn attempt_counters_are_per_chunk() {
        let session = SessionState::new();
        assert_eq!(session.attempts(1), 0);
        assert_eq!(session.bump_attempts(1), 1);
        assert_eq!(session.bump_attempts(1), 2);
        assert_eq!(session.attempts(2), 0, "chunk 2 has its own counter");
    }

    #[test]
    fn progress_sums_regardless_of_arrival_order() {
        let a = SessionState::new();
        a.record_progress(1, 1000);
        a.record_progress(2, 2000);

        let b = SessionState::new();
        b.record_progress(2, 2000);
        b.record_progress(1, 1000);

        assert_eq!(a.loaded(), 3000);
        assert_eq!(b.loaded(), 3000);
    }

    #[test]
    fn progress_overwrites_per_chunk() {
        let session = SessionState::new();
        session.record_progress(1, 500);
        session.record_progress(1, 800);
        assert_eq!(session.loaded(), 800);
    }
}
