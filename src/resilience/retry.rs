// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for store connectivity and reads.
//!
//! Only idempotent work goes through here: connecting, schema setup and
//! read-only statements. Conditional writes are never retried, because a
//! retry after an ambiguous success would report "not applied" for a write
//! that did apply.
//!
//! # Example
//!
//! ```
//! use inventory_tree::RetryConfig;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, Some(5));
//!
//! // Connect forever, like a long-running service waiting for its database
//! assert_eq!(RetryConfig::forever().max_attempts, None);
//!
//! // Query: quick retry, then fail
//! assert_eq!(RetryConfig::query().max_attempts, Some(3));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff schedule for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first; `None` retries forever.
    pub max_attempts: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Connection and schema setup: 5 attempts, failing after a few seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Keep trying to connect until the store shows up, backing off to 30s.
    #[must_use]
    pub fn forever() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }

    /// Read-only statements: 3 quick attempts, then the caller sees the error.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }

    /// Minimal delays for tests.
    #[must_use]
    pub fn test() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay to wait after `delay`, capped at `max_delay`.
    #[must_use]
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }

    fn exhausted(&self, attempts: usize) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Retry `operation` on every error.
pub async fn retry<F, Fut, T, E>(operation_name: &str, config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, operation, |_| true).await
}

/// Retry `operation` while `is_transient` says the error may go away.
/// Permanent errors are returned immediately.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0usize;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Operation succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if !is_transient(&err) || config.exhausted(attempts) {
                    return Err(err);
                }

                match config.max_attempts {
                    Some(max) => warn!(
                        operation = operation_name,
                        attempt = attempts,
                        max_attempts = max,
                        error = %err,
                        ?delay,
                        "Operation failed, retrying"
                    ),
                    None => warn!(
                        operation = operation_name,
                        attempt = attempts,
                        error = %err,
                        ?delay,
                        "Operation failed, will retry until it succeeds"
                    ),
                }

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
