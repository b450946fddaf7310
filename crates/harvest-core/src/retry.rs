//! Exponential back-off shared by the source invoker and the sink pusher.
//!
//! The delay is applied *before* every attempt, the first one included, so
//! bursts against the source API are throttled even when nothing fails.
//! Attempt `k` (0-indexed) sleeps `min(base_delay * 2^k, max_delay)`.
//!
//! | Attempt | Sleep before sending (base = 100 ms) |
//! |---------|--------------------------------------|
//! | 0       | 100 ms                               |
//! | 1       | 200 ms                               |
//! | 2       | 400 ms                               |
//! | 3       | 800 ms                               |
//! | 4       | 1 600 ms                             |

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Attempt budget and delay curve for [`retry_with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included. Values below 1 are
    /// treated as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Source API defaults: 5 attempts, 100 ms base, capped at 5 s.
    #[must_use]
    pub const fn source_default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(5))
    }

    /// A policy with no sleeping at all. Used by tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay slept before attempt `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::source_default()
    }
}

/// The error that ended a [`retry_with_backoff`] loop.
#[derive(Debug)]
pub struct Attempted<E> {
    pub error: E,
    /// Number of attempts actually made, including the failing one.
    pub attempts: u32,
    /// `true` when the error was retriable and the budget ran out; `false`
    /// when a non-retriable error stopped the loop early.
    pub exhausted: bool,
}

/// Runs `operation` until it succeeds, fails with a non-retriable error, or
/// the policy's attempt budget is spent.
///
/// `operation` receives the 0-indexed attempt number so callers can log it.
///
/// # Errors
///
/// Returns [`Attempted`] wrapping the last error observed.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retriable: P,
    mut operation: F,
) -> Result<T, Attempted<E>>
where
    E: Display,
    P: Fn(&E) -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let budget = policy.attempt_budget();
    let mut attempt = 0u32;

    loop {
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retriable = is_retriable(&error);
                attempt += 1;
                if !retriable || attempt >= budget {
                    return Err(Attempted {
                        error,
                        attempts: attempt,
                        exhausted: retriable,
                    });
                }
                #[allow(clippy::cast_possible_truncation)]
                let next_delay_ms = policy.delay_for(attempt).as_millis() as u64;
                tracing::warn!(
                    attempt,
                    max_attempts = budget,
                    next_delay_ms,
                    error = %error,
                    "transient error, retrying after back-off"
                );
            }
        }
    }
}
