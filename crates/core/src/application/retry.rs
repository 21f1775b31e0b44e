// Backoff Retrier - bounded Fibonacci retry for transient remote failures
use crate::port::HandlerError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default attempt budget (first call included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;

/// Default backoff unit
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Error kinds eligible for retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryableKind {
    RateLimited,
    TransientConnection,
}

/// Maps an error onto a retryable kind, if it has one
pub trait Classify {
    fn retryable_kind(&self) -> Option<RetryableKind>;
}

/// Outcome of a retried call that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// Non-retryable error; returned on the attempt it happened
    Fatal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(e) => e,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "retries exhausted after {} attempts: {}", attempts, last)
            }
            RetryError::Fatal(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Fibonacci sequence 1, 1, 2, 3, 5, 8, ...
#[derive(Debug, Clone)]
pub struct Fibonacci {
    current: u64,
    next: u64,
}

impl Default for Fibonacci {
    fn default() -> Self {
        Self {
            current: 1,
            next: 1,
        }
    }
}

impl Iterator for Fibonacci {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let value = self.current;
        self.current = self.next;
        self.next = value.saturating_add(self.next);
        Some(value)
    }
}

/// Retry policy
///
/// Waits `fib(n) * unit` after the n-th failed attempt (no jitter) and gives up
/// once `max_attempts` calls have failed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    unit: Duration,
    retryable: Vec<RetryableKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF_UNIT)
    }
}

impl RetryPolicy {
    /// Create a policy retrying both rate limits and transient connection errors
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts, first call included (clamped to at least 1)
    /// * `unit` - Multiplier for the Fibonacci step
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(15, Duration::from_secs(1));
    /// let listing = policy.retry(|| client.create_listing(&item)).await?;
    /// ```
    pub fn new(max_attempts: u32, unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            unit,
            retryable: vec![RetryableKind::RateLimited, RetryableKind::TransientConnection],
        }
    }

    /// Restrict which kinds are retried
    pub fn retrying(mut self, kinds: &[RetryableKind]) -> Self {
        self.retryable = kinds.to_vec();
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let step = Fibonacci::default()
            .nth(attempt.saturating_sub(1) as usize)
            .unwrap_or(u64::MAX);
        let factor = u32::try_from(step).unwrap_or(u32::MAX);
        self.unit.saturating_mul(factor)
    }

    fn is_retryable<E: Classify>(&self, err: &E) -> bool {
        err.retryable_kind()
            .map(|kind| self.retryable.contains(&kind))
            .unwrap_or(false)
    }

    /// Run `op` until it succeeds, fails fatally, or the attempt budget runs out
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Retried call succeeded");
                    }
                    return Ok(value);
                }
                Err(err) if self.is_retryable(&err) => {
                    if attempt >= self.max_attempts {
                        warn!(
                            attempts = attempt,
                            error = %err,
                            "Giving up after max attempts"
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    let wait = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Backing off before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(RetryError::Fatal(err)),
            }
        }
    }
}

impl Classify for HandlerError {
    fn retryable_kind(&self) -> Option<RetryableKind> {
        match self {
            HandlerError::RateLimited(_) => Some(RetryableKind::RateLimited),
            HandlerError::TransientConnection(_) => Some(RetryableKind::TransientConnection),
            _ => None,
        }
    }
}

impl From<RetryError<HandlerError>> for HandlerError {
    fn from(err: RetryError<HandlerError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => HandlerError::RetriesExhausted {
                attempts,
                last_error: last.to_string(),
            },
            RetryError::Fatal(e) => e,
        }
    }
}
