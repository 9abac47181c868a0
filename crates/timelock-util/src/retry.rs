//! Bounded retry with exponential backoff
//!
//! Store and sync operations are treated as transient failures. They are
//! retried a fixed number of times with doubling delays; once attempts are
//! exhausted the last error is handed back to the caller, which is expected
//! to enter degraded mode rather than loop forever.

use std::time::Duration;

/// Retry policy shared by the store writer and the sync publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (always at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    /// Single attempt, no waiting. Used by tests and one-shot tools.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Fresh backoff iterator for one retried operation
    pub fn backoff(&self) -> Backoff {
        Backoff {
            current: self.initial_backoff,
            max: self.max_backoff,
        }
    }

    /// Run `op` until it succeeds or attempts are exhausted, sleeping the
    /// calling thread between attempts.
    ///
    /// Only for synchronous call sites; async code should drive
    /// [`RetryPolicy::backoff`] with its runtime's timer instead.
    pub fn run_blocking<T, E, F>(&self, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50), Duration::from_secs(1))
    }
}

/// Doubling delay sequence capped at the policy maximum
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = next.min(self.max);
        delay
    }
}

/// Error returned once every attempt has failed
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last_error)
    }
}
