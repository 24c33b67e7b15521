//! Bounded retry with linear, capped backoff.
//!
//! Attempt `n` that fails before the last attempt is followed by a sleep of
//! `min(base_delay * n, max_delay)`. The executor does not classify errors:
//! every failure is retried. A cancelled attempt ends the loop at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::domain::{Cancelled, ValidationError};
use crate::metrics::RunMetrics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first (must be at least 1).
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Sleep after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let linear = self.base_delay_ms.saturating_mul(u64::from(attempt));
        Duration::from_millis(linear.min(self.max_delay_ms))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidRetryPolicy(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidRetryPolicy(format!(
                "base delay {}ms exceeds max delay {}ms",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Why a single attempt did not succeed.
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Counted against the attempt budget.
    Failed(E),
    /// Ends the loop without using up an attempt.
    Cancelled(Cancelled),
}

impl<E> From<Cancelled> for AttemptError<E> {
    fn from(c: Cancelled) -> Self {
        AttemptError::Cancelled(c)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[error("operation failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Stateless retry loop; cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    metrics: Option<Arc<RunMetrics>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    /// Count every retry in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<RunMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_in(None, || {
            let attempt = operation();
            async move { attempt.await.map_err(AttemptError::Failed) }
        })
        .await
    }

    /// Like [`RetryExecutor::execute`], but checks `ctx` before each attempt
    /// and lets the operation abort the loop with [`AttemptError::Cancelled`].
    pub async fn execute_in<T, E, F, Fut>(
        &self,
        ctx: Option<&RunContext>,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if let Some(ctx) = ctx {
                ctx.check()?;
            }

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Cancelled(c)) => return Err(RetryError::Cancelled(c)),
                Err(AttemptError::Failed(err)) => err,
            };

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.policy.delay_for(attempt);
            debug!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, backing off"
            );
            if let Some(metrics) = &self.metrics {
                metrics.inc_retries();
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
