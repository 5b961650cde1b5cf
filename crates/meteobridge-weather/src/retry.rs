//! Retry policy for upstream HTTP calls.
//!
//! Transient failures are retried with exponential backoff:
//! - Timeouts and connection errors
//! - 5xx server errors (plus 408 and 429)
//!
//! Not retried:
//! - 4xx client errors (bad coordinates, malformed query)
//! - Body/decode errors

use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

/// Default retry configuration
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const BACKOFF_BASE: f64 = 1.5;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Jitter added on top of the base delay is uniform in [0, this) seconds.
pub const JITTER_MAX_SECS: f64 = 0.5;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Cap applied to the delay after jitter
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            max_delay,
        }
    }

    /// Deterministic part of the delay after `attempt` failed attempts
    /// (zero-based): `1.5^attempt` seconds, capped.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.capped(BACKOFF_BASE.powi(exponent(attempt)))
    }

    /// Delay to sleep before the next attempt: base delay plus random
    /// jitter, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..JITTER_MAX_SECS);
        self.capped(BACKOFF_BASE.powi(exponent(attempt)) + jitter)
    }

    // The float must be clamped before conversion: from_secs_f64 panics
    // once 1.5^attempt exceeds Duration's range.
    fn capped(&self, secs: f64) -> Duration {
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

// 1.5^1000 already overflows to infinity; clamping here keeps the cast
// from wrapping for attempt counts past i32::MAX.
fn exponent(attempt: u32) -> i32 {
    attempt.min(1_000) as i32
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Should retry the request
    Retry,
    /// Should not retry - permanent failure
    NoRetry,
}

/// Check if a reqwest error is retryable
pub fn classify_error(error: &reqwest::Error) -> RetryDecision {
    if error.is_timeout() {
        tracing::debug!("request timed out, will retry");
        return RetryDecision::Retry;
    }

    if error.is_connect() {
        tracing::debug!("connection error, will retry");
        return RetryDecision::Retry;
    }

    if let Some(status) = error.status() {
        return classify_status(status);
    }

    RetryDecision::NoRetry
}

/// Check if a status code is retryable
pub fn classify_status(status: StatusCode) -> RetryDecision {
    if status.is_server_error() {
        return RetryDecision::Retry;
    }

    // Rate limiting and upstream timeouts retry with backoff
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        return RetryDecision::Retry;
    }

    RetryDecision::NoRetry
}
