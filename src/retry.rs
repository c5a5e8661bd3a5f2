use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::errors::{AppError, AppResult};

const MAX_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// Delay doubles per attempt: base, 2·base, 4·base, …
    Exponential,
    /// Delay grows with the attempt number: base, 2·base, 3·base, …
    Linear,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Exponential,
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Linear,
        }
    }

    /// Backoff before the retry that follows `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Exponential => self.base_delay * (1_u32 << (attempt - 1).min(MAX_EXPONENT)),
            Backoff::Linear => self.base_delay * attempt,
        }
    }
}

/// How one failed attempt should be handled.
#[derive(Debug)]
pub enum RetryError {
    /// Retry on the policy schedule.
    Transient(AppError),
    /// Retry after a caller-chosen flat delay instead of the schedule.
    TransientAfter(AppError, Duration),
    /// Give up immediately.
    Fatal(AppError),
}

impl RetryError {
    fn into_error(self) -> AppError {
        match self {
            RetryError::Transient(err)
            | RetryError::TransientAfter(err, _)
            | RetryError::Fatal(err) => err,
        }
    }
}

/// Runs `op` up to `policy.max_attempts` times, sleeping between attempts.
/// Exhaustion yields the last error; the caller decides whether that is fatal
/// to the run or just to the record.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(RetryError::Fatal(err)) => return Err(err),
            Err(failure) if attempt < policy.max_attempts => {
                let delay = match &failure {
                    RetryError::TransientAfter(_, delay) => *delay,
                    _ => policy.delay_for(attempt),
                };
                let err = failure.into_error();
                warn!(?err, attempt, ?delay, "{label} failed; retrying");
                sleep(delay).await;
            }
            Err(failure) => return Err(failure.into_error()),
        }
    }
}
