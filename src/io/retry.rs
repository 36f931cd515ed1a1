//! Retry budget for outbound deliveries
//!
//! A message gets one initial write attempt plus up to `max_retries`
//! retries. Delays grow exponentially from `retry_delay` and are capped at
//! `max_delay`.

use crate::config::ServerSettings;
use std::time::Duration;

/// Retry policy applied to every outbound message of a session
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Delay growth factor per retry
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay: Duration::from_millis(50),
            backoff_multiplier: 1.5,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_retries` retries and no delay between attempts
    ///
    /// # Examples
    ///
    /// ```
    /// use igtl_tracking_server::io::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::immediate(10);
    /// assert_eq!(policy.max_attempts(), 11);
    /// ```
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Policy configured by the `[server]` section
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            max_retries: settings.retry_attempts,
            retry_delay: settings.retry_delay,
            ..Default::default()
        }
    }

    /// Total number of write attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait before retry number `retry` (1-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32 - 1);
        let delay = self.retry_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}
