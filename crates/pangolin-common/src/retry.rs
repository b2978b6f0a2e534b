//! Retry with exponential backoff and jitter
//!
//! Used for startup calls that must eventually succeed (CRD installation)
//! and for writes whose input cannot be recovered on a later pass (freshly
//! issued connector credentials). Other reconcile-time failures are not
//! retried here; they surface as an `Error` outcome and are requeued by the
//! runner.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff settings
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum attempts (0 = retry forever)
    pub max_attempts: u32,
    /// First delay
    pub initial_delay: Duration,
    /// Delay ceiling
    pub max_delay: Duration,
    /// Growth factor applied after each failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Bounded number of attempts with default delays
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Delay after `delay`, grown by the multiplier and capped
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds or `max_attempts` is exhausted.
///
/// Each sleep is the current delay scaled by a random factor in 0.5..1.5.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(operation = %operation_name, attempt, error = %err, "giving up after max attempts");
            return Err(err);
        }

        let jittered = delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5));
        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = jittered.as_millis() as u64,
            "operation failed, retrying"
        );
        tokio::time::sleep(jittered).await;
        delay = config.next_delay(delay);
    }
}
