//! Backoff and polling policies for the reasoning client.
//!
//! # Retry Policy
//!
//! - 3 total attempts
//! - Delay before retry `n` (0-based) is `base_delay * 2^n`: 2s, 4s, 8s ...
//! - Only rate-limit/overload failures are retried
//!
//! # Poll Policy
//!
//! - Asset status is re-read every `interval` (3s) while it is processing
//! - After `max_attempts` status reads the wait is abandoned

use std::time::Duration;

use crate::config::{PollSection, RetrySection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait before retry number `retry_index` (0 before the second attempt).
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_index).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl From<RetrySection> for RetryPolicy {
    fn from(section: RetrySection) -> Self {
        Self::new(section.max_attempts, Duration::from_millis(section.base_delay_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Status reads allowed after the upload before giving up.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 100,
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Longest time a caller can block waiting for an asset.
    pub fn ceiling(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

impl From<PollSection> for PollPolicy {
    fn from(section: PollSection) -> Self {
        Self::new(Duration::from_millis(section.interval_ms), section.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays_double_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        assert!(policy.delay_for(64) >= policy.delay_for(31));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_from_sections() {
        let retry: RetryPolicy = RetrySection {
            max_attempts: 5,
            base_delay_ms: 100,
        }
        .into();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(100));

        let poll: PollPolicy = PollSection {
            interval_ms: 3_000,
            max_attempts: 20,
        }
        .into();
        assert_eq!(poll.ceiling(), Duration::from_secs(60));
    }
}
