//! Shared retry/backoff policy.

use std::time::Duration;

use crate::types::UploadStatus;

/// Attempt budget and linear backoff shared by every network phase.
///
/// The first try is attempt 0, so a budget of `max_retries` permits
/// `max_retries + 1` total tries. Terminal session states veto retries
/// regardless of remaining budget.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Returns `true` if an operation that has already made `attempts`
    /// retries may be attempted again.
    pub fn retry_available(&self, attempts: u32, status: UploadStatus) -> bool {
        if status.is_terminal() {
            return false;
        }
        attempts < self.max_retries
    }

    /// Delay before the given retry attempt: `attempt * base_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_max_retries_beyond_first_attempt() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        assert!(policy.retry_available(0, UploadStatus::Uploading));
        assert!(policy.retry_available(1, UploadStatus::Uploading));
        assert!(!policy.retry_available(2, UploadStatus::Uploading));
    }

    #[test]
    fn zero_budget_never_retries() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert!(!policy.retry_available(0, UploadStatus::Uploading));
    }

    #[test]
    fn terminal_status_vetoes_remaining_budget() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        assert!(!policy.retry_available(0, UploadStatus::Cancelled));
        assert!(!policy.retry_available(0, UploadStatus::Failed));
        assert!(!policy.retry_available(0, UploadStatus::Completed));
        assert!(policy.retry_available(0, UploadStatus::Ready));
        assert!(policy.retry_available(0, UploadStatus::Uploading));
    }

    #[test]
    fn backoff_is_linear_in_attempt_number() {
        let policy = RetryPolicy::new(5, Duration::from_millis(2000));
        assert_eq!(policy.delay(1), Duration::from_millis(2000));
        assert_eq!(policy.delay(2), Duration::from_millis(4000));
        assert_eq!(policy.delay(3), Duration::from_millis(6000));
    }
}
