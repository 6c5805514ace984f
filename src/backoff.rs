//! Exponential backoff gate for a single qBittorrent connection.

use std::time::Duration;

use tokio::time::Instant;

/// Wait after the first consecutive error.
const BASE_BACKOFF_SECONDS: u64 = 30;

/// Upper limit for the wait between attempts.
const MAX_BACKOFF_SECONDS: u64 = 300;

/// Tracks consecutive connection errors and decides when the next attempt is allowed.
///
/// The tracker is healthy until the first error is recorded.
/// After that, each further error doubles the wait time up to five minutes.
/// A successful call resets it back to healthy.
#[derive(Debug, Default, Clone)]
pub struct ErrorBackoff {
    error_count: u32,
    last_error: Option<Instant>,
}

impl ErrorBackoff {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            error_count: 0,
            last_error: None,
        }
    }

    /// Record a failed call at the current time.
    pub fn record_error(&mut self) {
        self.record_error_at(Instant::now());
    }

    /// Record a failed call at the given time.
    pub fn record_error_at(&mut self, now: Instant) {
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(now);
    }

    /// Reset back to the healthy state.
    pub fn record_success(&mut self) {
        self.error_count = 0;
        self.last_error = None;
    }

    /// Check if enough time has passed since the last error to try again.
    #[must_use]
    pub fn should_attempt(&self) -> bool {
        self.should_attempt_at(Instant::now())
    }

    /// Check if enough time will have passed at the given time.
    #[must_use]
    pub fn should_attempt_at(&self, now: Instant) -> bool {
        self.last_error.is_none_or(|last_error| {
            now.saturating_duration_since(last_error) > wait_threshold(self.error_count)
        })
    }

    #[must_use]
    pub const fn error_count(&self) -> u32 {
        self.error_count
    }

    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }
}

/// Wait time required after the given number of consecutive errors:
/// `min(300, 30 * 2^(count - 1))` seconds.
#[must_use]
pub fn wait_threshold(error_count: u32) -> Duration {
    if error_count == 0 {
        return Duration::ZERO;
    }
    let exponent = (error_count - 1).min(16);
    let seconds = BASE_BACKOFF_SECONDS
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(MAX_BACKOFF_SECONDS);
    Duration::from_secs(seconds)
}

#[cfg(test)]
mod wait_threshold_tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let thresholds: Vec<u64> = (1..=6).map(|count| wait_threshold(count).as_secs()).collect();
        assert_eq!(thresholds, vec![30, 60, 120, 240, 300, 300]);
    }

    #[test]
    fn zero_errors_has_no_wait() {
        assert_eq!(wait_threshold(0), Duration::ZERO);
    }

    #[test]
    fn large_counts_stay_capped() {
        assert_eq!(wait_threshold(100), Duration::from_secs(300));
        assert_eq!(wait_threshold(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn never_decreases() {
        let mut previous = Duration::ZERO;
        for count in 0..40 {
            let current = wait_threshold(count);
            assert!(current >= previous);
            previous = current;
        }
    }
}
