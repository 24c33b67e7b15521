//! Token-bucket admission control.
//!
//! The bucket starts full (`burst` tokens) and refills continuously at
//! `rate` tokens per second. One token admits one provider call.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimitConfig;
use crate::context::RunContext;
use crate::domain::Cancelled;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared by every provider call site of a run.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: rate_per_second.max(f64::MIN_POSITIVE),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;
    }

    /// Take a token if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently in the bucket.
    pub async fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens.floor() as u32
    }

    /// Wait for a token, or fail once the run is cancelled or past its deadline.
    pub async fn acquire(&self, ctx: &RunContext) -> Result<(), Cancelled> {
        ctx.check()?;

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                // Tiny rates overflow `Duration`; wait until cancelled instead.
                Duration::try_from_secs_f64((1.0 - bucket.tokens) / self.rate)
                    .unwrap_or(Duration::MAX)
            };

            trace!(wait_ms = wait.as_millis() as u64, "rate limited, waiting for token");
            ctx.metrics().inc_throttle_waits();

            tokio::select! {
                reason = ctx.cancelled() => return Err(reason),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn burst_then_throttle() {
        let limiter = RateLimiter::new(10.0, 3);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_caps_at_burst() {
        let limiter = RateLimiter::new(10.0, 2);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill() {
        let (ctx, _handle) = RunContext::unbounded();
        let limiter = RateLimiter::new(2.0, 1);
        let start = Instant::now();

        limiter.acquire(&ctx).await.unwrap();
        limiter.acquire(&ctx).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(ctx.metrics().throttle_waits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_fails_at_deadline() {
        let (ctx, _handle) = RunContext::new(Duration::from_secs(1));
        let limiter = RateLimiter::new(0.1, 1);

        limiter.acquire(&ctx).await.unwrap();
        // Next token is 10s away; the deadline is 1s away.
        let err = limiter.acquire(&ctx).await.unwrap_err();
        assert_eq!(err, Cancelled::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn vanishing_rate_waits_for_deadline() {
        let (ctx, _handle) = RunContext::new(Duration::from_secs(1));
        let limiter = RateLimiter::new(1e-20, 1);

        limiter.acquire(&ctx).await.unwrap();
        let err = limiter.acquire(&ctx).await.unwrap_err();
        assert_eq!(err, Cancelled::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_fails_on_cancel() {
        let (ctx, handle) = RunContext::unbounded();
        let limiter = Arc::new(RateLimiter::new(0.01, 1));
        limiter.acquire(&ctx).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let ctx = ctx.clone();
            tokio::spawn(async move { limiter.acquire(&ctx).await })
        };
        tokio::task::yield_now().await;
        handle.cancel();

        assert_eq!(waiter.await.unwrap(), Err(Cancelled::Requested));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_limiter_serves_concurrent_callers() {
        let (ctx, _handle) = RunContext::unbounded();
        let limiter = Arc::new(RateLimiter::new(100.0, 5));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move { limiter.acquire(&ctx).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(limiter.available().await, 0);
    }
}
