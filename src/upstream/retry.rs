//! Bounded exponential backoff for rate-limited requests.
//!
//! Only rate-limit signals are retried here; every other failure is handed
//! back to the caller, which decides whether to fall back to another model
//! or key.

use std::time::Duration;
use tracing::{debug, warn};

use crate::upstream::UpstreamError;

// MARK: - Constants

/// Default maximum number of retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial backoff duration (1 second).
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

/// Default maximum backoff duration (8 seconds).
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 8000;

/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

// MARK: - Retry Policy

/// Policy for retrying rate-limited requests with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first request.
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds. Also caps provider-supplied
    /// `Retry-After` values.
    pub max_backoff_ms: u64,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a new retry policy with default settings.
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::new().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Backoff before retry number `attempt` (zero-based).
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff_ms as f64) as u64;

        Duration::from_millis(backoff_ms)
    }

    /// Whether `error` on retry number `attempt` deserves another try.
    pub fn should_retry(&self, error: &UpstreamError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_rate_limited()
    }

    /// Delay before retry number `attempt`, preferring the provider's hint.
    fn delay_for(&self, error: &UpstreamError, attempt: u32) -> Duration {
        let cap = Duration::from_millis(self.max_backoff_ms);
        error
            .retry_after_duration()
            .map(|hint| hint.min(cap))
            .unwrap_or_else(|| self.calculate_backoff(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// MARK: - Retry Executor

/// Run `operation`, retrying rate-limit failures according to `policy`.
pub async fn execute_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt, "Upstream request succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if !policy.should_retry(&error, attempt) {
                    return Err(error);
                }

                let backoff = policy.delay_for(&error, attempt);
                attempt += 1;

                warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Upstream rate limited, retrying"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}

// MARK: - Tests
