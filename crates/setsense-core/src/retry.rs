//! Retry logic for transient failures.
//!
//! Used by the persistence boundary to append finished workouts. Discovery
//! does not use it: reconnecting to a sensor is always a user decision.
//!
//! # Example
//!
//! ```
//! use setsense_core::{RetryConfig, with_retry, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::for_persist();
//!
//! let id = with_retry(&config, "append_workout", || async {
//!     // Your storage call here
//!     Ok::<_, Error>(7)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Backoff policy: `initial_delay * backoff_multiplier^attempt`, capped at
/// `max_delay`, plus up to 25% random extra when `jitter` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Default backoff with `max_retries` retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Fail on the first error.
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Policy for appending a finished workout: four retries from 250 ms,
    /// doubling up to 4 s. A locked database usually clears well within that.
    pub fn for_persist() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = (self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        if self.jitter {
            Duration::from_secs_f64(delay * (1.0 + rand::rng().random::<f64>() * 0.25))
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

/// Run `operation` until it succeeds, fails with an error that
/// [`is_retryable`] rejects, or runs out of retries. The last error wins.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if !is_retryable(&e) || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Transient errors: timeouts, radio errors and storage failures.
pub fn is_retryable(error: &Error) -> bool {
    matches!(
        error,
        Error::Timeout { .. } | Error::Bluetooth(_) | Error::Storage(_)
    )
}
