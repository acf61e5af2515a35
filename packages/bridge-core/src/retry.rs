//! Retry policy shared by the verifier fetch, the scanner, the sign coordinator and
//! the registrar.
//!
//! Provides bounded or unbounded exponential backoff with a caller-supplied terminal
//! predicate, and string classification of node error messages.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first try included); `None` retries forever
    pub max_attempts: Option<u32>,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Constant interval between at most `attempts` tries.
    pub fn fixed(attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: Some(attempts),
            initial_backoff: interval,
            max_backoff: interval,
            backoff_multiplier: 1.0,
        }
    }

    /// Constant interval, never gives up.
    pub fn forever(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            ..Self::fixed(0, interval)
        }
    }

    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Whether another try is allowed after `failures` failed attempts.
    pub fn should_retry(&self, failures: u32) -> bool {
        match self.max_attempts {
            Some(max) => failures < max,
            None => true,
        }
    }

    /// Run `operation` until it succeeds, fails with an error accepted by
    /// `is_terminal`, or the attempt bound is exhausted. The last error is returned.
    ///
    /// `operation` receives the 0-indexed attempt number.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, mut operation: F, is_terminal: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0u32;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if is_terminal(&e) {
                        debug!(op = label, attempt, error = %e, "Terminal error, not retrying");
                        return Err(e);
                    }
                    let failures = attempt.saturating_add(1);
                    if !self.should_retry(failures) {
                        warn!(op = label, attempts = failures, error = %e, "Retries exhausted");
                        return Err(e);
                    }
                    let backoff = self.backoff_for_attempt(attempt);
                    debug!(
                        op = label,
                        attempt = failures,
                        max = ?self.max_attempts,
                        ?backoff,
                        error = %e,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt = failures;
                }
            }
        }
    }
}

/// Classifies node error messages for retry and endpoint-iteration decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure - should retry (RPC timeout, network issues)
    Transient,
    /// The node already holds this transaction; the local hash stands
    AlreadyKnown,
    /// Permanent failure - another endpoint will answer the same
    Permanent,
    /// Unknown error - may retry with backoff
    Unknown,
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("already known")
        || error_lower.contains("tx already exists in cache")
        || error_lower.contains("duplicate transaction")
        || error_lower.contains("nonce too low")
    {
        return ErrorClass::AlreadyKnown;
    }

    if error_lower.contains("insufficient funds")
        || error_lower.contains("invalid signature")
        || error_lower.contains("signature verification failed")
        || error_lower.contains("expired transaction")
        || error_lower.contains("overdrawn balance")
        || error_lower.contains("out of gas")
        || error_lower.contains("execution reverted")
        || error_lower.contains("invalid parameters")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}
