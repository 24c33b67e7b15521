//! Landing-zone stages and the concurrent stage runner.
//!
//! Stages are independent: none reads another's output. [`StageRunner::run`]
//! spawns one task per stage, awaits every task, and reports every failing
//! stage in one [`AggregateStageError`].

pub mod encryption;
pub mod guardrails;
pub mod logging;
pub mod networking;
pub mod roles;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use crate::config::LandingZoneConfig;
use crate::domain::{AggregateStageError, Cancelled, OrgError, ProviderError, Result, StageFailure};
use crate::obs;
use crate::provider::{CloudProvider, OrganizationInfo};
use crate::resilience::CallGuard;

pub use encryption::EncryptionStage;
pub use guardrails::GuardrailStage;
pub use logging::LoggingStage;
pub use networking::NetworkingStage;
pub use roles::RoleStage;

/// Everything a stage may read. Shared read-only by all stage tasks.
pub struct StageEnv {
    pub provider: Arc<dyn CloudProvider>,
    pub guard: CallGuard,
    pub config: Arc<LandingZoneConfig>,
    pub organization: OrganizationInfo,
}

impl StageEnv {
    /// Run a provider call through the run's rate limiter and retry policy.
    pub async fn call<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        self.guard.call(operation, call).await
    }
}

/// What one stage created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: String,
    /// Ids or names of created resources, in creation order.
    pub resources: Vec<String>,
    /// `true` when configuration turned the stage off.
    #[serde(default)]
    pub skipped: bool,
}

impl StageReport {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Self::default()
        }
    }

    pub fn skipped(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            resources: Vec::new(),
            skipped: true,
        }
    }

    pub fn record(&mut self, resource: impl Into<String>) {
        self.resources.push(resource.into());
    }
}

/// One governance-baseline concern.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, env: &StageEnv) -> anyhow::Result<StageReport>;
}

#[derive(Clone, Default)]
pub struct StageRunner {
    stages: Vec<Arc<dyn Stage>>,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("stages", &self.names())
            .finish()
    }
}

impl StageRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roles, encryption, logging, guardrails and networking.
    pub fn landing_zone() -> Self {
        Self::new()
            .with_stage(RoleStage)
            .with_stage(EncryptionStage)
            .with_stage(LoggingStage)
            .with_stage(GuardrailStage)
            .with_stage(NetworkingStage)
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage concurrently and wait for all of them.
    ///
    /// Reports come back in registration order. A failing stage never stops
    /// the others; every failure is listed in the returned error.
    pub async fn run(&self, env: Arc<StageEnv>) -> std::result::Result<Vec<StageReport>, AggregateStageError> {
        let ctx = env.guard.context().clone();
        let mut tasks = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let name = stage.name();
            let stage = Arc::clone(stage);
            let env = Arc::clone(&env);
            let span = tracing::info_span!("stage", stage = name);
            let task = tokio::spawn(async move { stage.apply(&env).await }.instrument(span));
            tasks.push((name, task));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        let mut failures = Vec::new();

        for (name, task) in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(anyhow::anyhow!("stage task did not complete: {join_err}")),
            };

            match outcome {
                Ok(report) => {
                    ctx.metrics().inc_stages_succeeded();
                    obs::emit_stage_finished(ctx.run_id(), name, report.resources.len(), true);
                    reports.push(report);
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    let cancelled = is_cancellation(&e);
                    ctx.metrics().inc_stages_failed();
                    obs::emit_stage_finished(ctx.run_id(), name, 0, false);
                    warn!(stage = name, error = %message, "stage failed");
                    failures.push(StageFailure {
                        stage: name.to_string(),
                        message,
                        cancelled,
                    });
                }
            }
        }

        if failures.is_empty() {
            info!(stages = reports.len(), "all landing-zone stages applied");
            Ok(reports)
        } else {
            Err(AggregateStageError {
                failures,
                total: self.stages.len(),
            })
        }
    }
}

/// Whether a stage error came from the run being cancelled.
fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<Cancelled>().is_some()
            || cause
                .downcast_ref::<OrgError>()
                .is_some_and(OrgError::is_cancelled)
    })
}
