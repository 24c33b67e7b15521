//! Attempt-count properties of RetryExecutor.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use orgforge_core::{RetryError, RetryExecutor, RetryPolicy};
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
#[error("flaky failure #{0}")]
struct Flaky(u32);

fn executor(max_attempts: u32) -> RetryExecutor {
    RetryExecutor::new(RetryPolicy::new(
        max_attempts,
        Duration::from_millis(100),
        Duration::from_millis(250),
    ))
}

#[tokio::test(start_paused = true)]
async fn succeeds_on_last_allowed_attempt() {
    for n in 1..=6 {
        let calls = AtomicU32::new(0);
        let value = executor(n)
            .execute(|| async {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call < n {
                    Err(Flaky(call))
                } else {
                    Ok(call)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, n);
        assert_eq!(calls.load(Ordering::SeqCst), n);
    }
}

#[tokio::test(start_paused = true)]
async fn always_failing_runs_exactly_n_times() {
    for n in 1..=6 {
        let calls = AtomicU32::new(0);
        let err = executor(n)
            .execute(|| async {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(Flaky(call))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), n);
        match &err {
            RetryError::Exhausted { attempts, last } => {
                assert_eq!(*attempts, n);
                assert_eq!(last.0, n);
            }
            RetryError::Cancelled(c) => panic!("unexpected cancellation: {c}"),
        }
        assert!(err.to_string().contains(&format!("after {n} attempt(s)")));
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_is_linear_and_capped() {
    let start = Instant::now();
    let _ = executor(4)
        .execute(|| async { Err::<(), _>(Flaky(0)) })
        .await;

    // 100ms + 200ms + min(300ms, 250ms)
    assert_eq!(start.elapsed(), Duration::from_millis(550));
}
