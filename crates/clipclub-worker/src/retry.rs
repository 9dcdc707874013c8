//! Bounded retry with exponential backoff.
//!
//! Used for operations against flaky external tools (clip downloads) and
//! for throttling log output of repeated background failures.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Set the total number of attempts (at least one).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base delay for exponential backoff.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the maximum delay between attempts.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before attempt `attempt + 1`.
    fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Success { value: T, attempts: u32 },
    /// Every attempt failed; carries the last error.
    Exhausted { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    /// Returns true if the operation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success { .. })
    }

    /// Number of attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. } | RetryResult::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Convert into a `Result`, keeping the attempt count on failure.
    pub fn into_result(self) -> Result<T, (E, u32)> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Exhausted { error, attempts } => Err((error, attempts)),
        }
    }
}

/// Run `operation` until it succeeds or `max_attempts` is reached.
///
/// The closure receives the 1-based attempt number. Attempts run one after
/// the other; there is no concurrency.
///
/// # Example
/// ```ignore
/// let config = RetryConfig::new("clip_download").with_max_attempts(25);
/// let result = retry_async(&config, |attempt| downloader.fetch_once(&clip, attempt)).await;
/// ```
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1u32;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryResult::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(e) if attempt < config.max_attempts => {
                let delay = config.delay_after_attempt(attempt);
                debug!(
                    operation = %config.operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return RetryResult::Exhausted {
                    error: e,
                    attempts: attempt,
                }
            }
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Suppresses log spam from a background loop after repeated failures.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    /// Create a new failure tracker.
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                failures = self.consecutive_failures,
                "Operation recovered after consecutive failures"
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    /// Get the current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}
