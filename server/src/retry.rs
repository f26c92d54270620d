//! Bounded retry of transient database failures.

use asof_engine::{StoreError, StoreErrorKind};
use std::future::Future;
use std::time::Duration;

const BASE_DELAY: Duration = Duration::from_millis(50);
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Classify a database failure.
///
/// Lost connections and pool timeouts may succeed on another attempt;
/// everything else (constraint violations, bad SQL, a closed pool) will not.
pub fn classify(err: &sqlx::Error) -> StoreErrorKind {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => StoreErrorKind::Transient,
        _ => StoreErrorKind::Fatal,
    }
}

/// The engine-side view of a database failure.
pub fn to_store_error(err: &sqlx::Error) -> StoreError {
    match classify(err) {
        StoreErrorKind::Transient => StoreError::transient(err.to_string()),
        StoreErrorKind::Fatal => StoreError::fatal(err.to_string()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: BASE_DELAY,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(8);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Run `op`, retrying transient failures until attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, sqlx::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if attempt < self.max_attempts
                        && classify(&err) == StoreErrorKind::Transient =>
                {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient database failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
