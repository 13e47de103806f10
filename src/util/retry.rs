//! Retry logic with exponential backoff

use std::time::Duration;

/// Options for retry behavior
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of retries after the first attempt (default: 3)
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds (default: 1000)
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds (default: 30000)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) to randomize delays (default: 0.1)
    pub jitter: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter: 0.1,
        }
    }
}

impl RetryOptions {
    /// Calculate delay for a given attempt with exponential backoff
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        // Base delay: initial * 2^attempt
        let base_delay = self.initial_delay_ms as f64 * 2.0_f64.powi(attempt as i32);

        let clamped = base_delay.min(self.max_delay_ms as f64);

        let jitter_amount = clamped * self.jitter * rand_float();
        let final_delay = clamped + jitter_amount;

        Duration::from_millis(final_delay as u64)
    }
}

/// Simple pseudo-random float between 0 and 1
fn rand_float() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(1))
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Retry a blocking operation with exponential backoff.
///
/// `is_retryable` decides whether an error warrants another attempt;
/// `on_retry` runs before each sleep with the 1-based attempt number that
/// failed, so callers can repair state (e.g. re-fetch) between attempts.
pub fn retry_blocking_with_backoff<T, E, F, P, R>(
    options: &RetryOptions,
    mut operation: F,
    is_retryable: P,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    P: Fn(&E) -> bool,
    R: FnMut(u32, &E) -> Result<(), E>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation(attempt) {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= options.max_retries || !is_retryable(&error) {
                    return Err(error);
                }

                let delay = options.calculate_delay(attempt);
                tracing::warn!(
                    "Attempt {} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    error,
                    delay
                );

                on_retry(attempt + 1, &error)?;
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
