//! Linear-backoff retry for cluster reads that race object propagation

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::ClusterError;

/// Default number of attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay unit between attempts
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Retry policy for cluster calls
///
/// Attempt `k` (0-based) is preceded by a sleep of `k * base_delay`, so the
/// first attempt runs immediately. Only errors for which
/// [`ClusterError::is_retryable`] holds are retried; the last error is
/// returned once attempts run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    // ========================================================================
    // SBIO: Pure business logic (no I/O)
    // ========================================================================

    /// Delay before the given 0-based attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Attempts actually made; a policy always tries at least once
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    // ========================================================================
    // Async execution
    // ========================================================================

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ClusterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClusterError>>,
    {
        let mut last_error = ClusterError::Transient(format!("{}: no attempt made", what));

        for attempt in 0..self.attempts() {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    debug!(
                        "{} failed (attempt {}/{}): {}",
                        what,
                        attempt + 1,
                        self.attempts(),
                        e
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}
