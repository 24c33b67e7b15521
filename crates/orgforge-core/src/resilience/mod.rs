//! Resilience layer for provider calls.
//!
//! Every cloud-mutating call goes through a [`CallGuard`], which takes a
//! rate-limiter token before each attempt and retries failed attempts.

pub mod rate_limit;
pub mod retry;

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::context::RunContext;
use crate::domain::{OrgError, ProviderError, Result};

pub use rate_limit::RateLimiter;
pub use retry::{AttemptError, RetryError, RetryExecutor, RetryPolicy};

/// Rate limiter plus retry executor, bound to one run.
#[derive(Debug, Clone)]
pub struct CallGuard {
    ctx: RunContext,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
}

impl CallGuard {
    pub fn new(ctx: RunContext, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        let retry = RetryExecutor::new(policy).with_metrics(Arc::clone(ctx.metrics()));
        Self {
            ctx,
            limiter,
            retry,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run one provider call under rate limiting and retry.
    ///
    /// `operation` names the call in errors and logs, e.g.
    /// `create_organizational_unit(Workloads)`.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let limiter = &self.limiter;
        let ctx = &self.ctx;

        let result = self
            .retry
            .execute_in(Some(ctx), || {
                let attempt = call();
                async move {
                    limiter.acquire(ctx).await?;
                    attempt.await.map_err(AttemptError::Failed)
                }
            })
            .await;

        match result {
            Ok(value) => {
                debug!(operation = %operation, "provider call succeeded");
                Ok(value)
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(OrgError::Provider {
                operation: operation.to_string(),
                attempts,
                source: last,
            }),
            Err(RetryError::Cancelled(reason)) => Err(OrgError::Cancelled(reason)),
        }
    }
}
