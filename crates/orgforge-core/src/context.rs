//! Run-scoped context: identity, deadline, cancellation and metrics.
//!
//! One `RunContext` is created per provisioning run and cloned into every
//! component that blocks or records metrics. Nothing here is process-global.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::Cancelled;
use crate::metrics::RunMetrics;

#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    deadline: Option<Instant>,
    cancel: Arc<watch::Sender<bool>>,
    metrics: Arc<RunMetrics>,
}

/// Cancels the run it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

impl RunContext {
    /// New run bounded by `timeout` from now.
    pub fn new(timeout: Duration) -> (Self, CancelHandle) {
        Self::build(Some(Instant::now() + timeout))
    }

    /// New run with no deadline; only an explicit cancel stops it.
    pub fn unbounded() -> (Self, CancelHandle) {
        Self::build(None)
    }

    fn build(deadline: Option<Instant>) -> (Self, CancelHandle) {
        let (tx, _rx) = watch::channel(false);
        let cancel = Arc::new(tx);
        let ctx = Self {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            deadline,
            cancel: Arc::clone(&cancel),
            metrics: Arc::new(RunMetrics::new()),
        };
        (ctx, CancelHandle { cancel })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn metrics(&self) -> &Arc<RunMetrics> {
        &self.metrics
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if the run was cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), Cancelled> {
        if *self.cancel.borrow() {
            return Err(Cancelled::Requested);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Cancelled::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves once the run is cancelled or the deadline passes.
    pub async fn cancelled(&self) -> Cancelled {
        let mut rx = self.cancel.subscribe();
        let requested = async move {
            // The sender lives in `self`, so `changed` only errors after drop.
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = requested => Cancelled::Requested,
                _ = tokio::time::sleep_until(deadline) => Cancelled::DeadlineExceeded,
            },
            None => {
                requested.await;
                Cancelled::Requested
            }
        }
    }
}
