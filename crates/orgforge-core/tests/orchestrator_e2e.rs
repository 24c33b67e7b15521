//! Full provisioning runs against the simulated provider and in-memory state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orgforge_core::manifest::{LandingZoneManifest, MANIFEST_PARAMETER_PATH};
use orgforge_core::orchestrator::ORGANIZATION_INFO_PATH;
use orgforge_core::{
    CloudProvider, OrgError, OrganizationConfig, Orchestrator, OuSpec, PersistenceError, Phase, ProviderError,
    RunContext, SimulatedProvider, Stage, StageEnv, StageReport, StageRunner, StateStore,
    StateStoreConfig,
};
use orgforge_state::fakes::{MemoryBlobStore, MemoryStateTable};

fn state_store() -> Arc<StateStore> {
    Arc::new(StateStore::new(
        Arc::new(MemoryStateTable::new()),
        Arc::new(MemoryBlobStore::new()),
        StateStoreConfig::default(),
    ))
}

fn orchestrator(config: OrganizationConfig, provider: &Arc<SimulatedProvider>) -> Orchestrator {
    Orchestrator::new(config, Arc::clone(provider) as Arc<dyn CloudProvider>, state_store())
}

fn phase_of(err: &OrgError) -> Option<Phase> {
    match err {
        OrgError::PhaseFailed { phase, .. } => Some(*phase),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn default_run_provisions_landing_zone() {
    let provider = Arc::new(SimulatedProvider::new());
    let orchestrator = orchestrator(OrganizationConfig::default(), &provider);
    let (ctx, _cancel) = RunContext::new(Duration::from_secs(30 * 60));

    let outcome = orchestrator.run(&ctx).await.unwrap();

    assert_eq!(outcome.organization.id, "o-1");
    assert_eq!(outcome.topology.get("Security").unwrap().parent_id, outcome.organization.root_id);
    assert!(outcome.topology.get("Sandbox").is_some());
    assert_eq!(outcome.accounts.len(), 2);
    assert!(outcome.accounts.iter().all(|a| a.id.is_some()));
    assert_eq!(outcome.stages.len(), 5);
    assert!(outcome.stages.iter().all(|s| !s.skipped));

    let published: LandingZoneManifest =
        serde_json::from_str(&provider.parameter(MANIFEST_PARAMETER_PATH).unwrap().value).unwrap();
    assert_eq!(published, outcome.manifest);
    assert_eq!(
        published.organization_structure["Security"].accounts,
        vec!["AFT-Management", "AFT-Networking"]
    );
    assert!(provider.parameter(ORGANIZATION_INFO_PATH).is_some());

    let saved = orchestrator.state().load().await.unwrap();
    assert_eq!(saved.topology, outcome.topology);
    assert_eq!(saved.tags["ManagedBy"], "orgforge");

    assert_eq!(ctx.metrics().ous_created(), 2);
    assert_eq!(ctx.metrics().accounts_created(), 2);
    assert!(provider.deleted().is_empty());
    orchestrator.state().close().await;
}

#[tokio::test(start_paused = true)]
async fn declared_trees_follow_security_and_default_ou() {
    let mut config = OrganizationConfig::default();
    config.landing_zone.create_default_accounts = false;
    config.landing_zone.organization_units = vec![OuSpec::new("Workloads")
        .with_child(OuSpec::new("Development"))
        .with_child(OuSpec::new("Production"))];
    let provider = Arc::new(SimulatedProvider::new());

    let (ctx, _cancel) = RunContext::unbounded();
    let outcome = orchestrator(config, &provider).run(&ctx).await.unwrap();

    assert_eq!(
        provider.targets("create_organizational_unit"),
        vec!["Security", "Sandbox", "Workloads", "Development", "Production"]
    );
    assert!(outcome.accounts.is_empty());
    let workloads = &outcome.manifest.organization_structure["Workloads"];
    assert_eq!(workloads.children.len(), 2);
    assert_eq!(workloads.children["Production"].id, outcome.topology.get("Production").unwrap().id);
}

#[tokio::test(start_paused = true)]
async fn stage_failure_unwinds_created_resources() {
    let provider = Arc::new(SimulatedProvider::new());
    provider.fail_always("create_log_trail", ProviderError::Rejected("bucket missing".to_string()));
    let orchestrator = orchestrator(OrganizationConfig::default(), &provider);
    let (ctx, _cancel) = RunContext::unbounded();

    let err = orchestrator.run(&ctx).await.unwrap_err();

    assert_eq!(phase_of(&err), Some(Phase::Stages));
    assert!(matches!(err.root(), OrgError::Stages(agg) if agg.failures.len() == 1));
    assert!(err.to_string().contains("logging"));

    let deleted = provider.deleted();
    assert_eq!(deleted.last().map(String::as_str), Some("o-1"));
    for id in ["ou-1", "ou-2", "acct-1", "acct-2", ORGANIZATION_INFO_PATH] {
        assert!(deleted.iter().any(|d| d == id), "{id} was not cleaned up");
    }
    // Accounts close before their OUs are deleted.
    let position = |id: &str| deleted.iter().position(|d| d == id).unwrap();
    assert!(position("acct-1") < position("ou-1"));

    assert!(provider.parameter(MANIFEST_PARAMETER_PATH).is_none());
    assert!(provider.parameter("/organization/ou/Security").is_none());
    assert!(matches!(
        orchestrator.state().load().await.unwrap_err(),
        PersistenceError::NotFound { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn hierarchy_failure_unwinds_partial_tree() {
    let provider = Arc::new(SimulatedProvider::new());
    provider.fail_target(
        "create_organizational_unit",
        "Sandbox",
        u32::MAX,
        ProviderError::Rejected("limit exceeded".to_string()),
    );
    let (ctx, _cancel) = RunContext::unbounded();

    let err = orchestrator(OrganizationConfig::default(), &provider)
        .run(&ctx)
        .await
        .unwrap_err();

    assert_eq!(phase_of(&err), Some(Phase::Hierarchy));
    assert_eq!(provider.call_count("create_account"), 0);
    assert_eq!(
        provider.deleted(),
        vec!["/organization/ou/Security", "ou-1", "/organization/info", "o-1"]
    );
}

#[tokio::test(start_paused = true)]
async fn deadline_cancels_run_and_still_cleans_up() {
    let provider = Arc::new(SimulatedProvider::new().with_latency(Duration::from_secs(1)));
    let (ctx, _cancel) = RunContext::new(Duration::from_millis(2_500));

    let err = orchestrator(OrganizationConfig::default(), &provider)
        .run(&ctx)
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert!(provider.deleted().iter().any(|d| d == "o-1"));
    assert_eq!(provider.call_count("create_role"), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_config_makes_no_provider_calls() {
    let mut config = OrganizationConfig::default();
    config.landing_zone.governed_regions.clear();
    let provider = Arc::new(SimulatedProvider::new());
    let (ctx, _cancel) = RunContext::unbounded();

    let err = orchestrator(config, &provider).run(&ctx).await.unwrap_err();

    assert_eq!(phase_of(&err), Some(Phase::Validation));
    assert!(matches!(err.root(), OrgError::Validation(_)));
    assert!(provider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_makes_no_provider_calls() {
    let provider = Arc::new(SimulatedProvider::new());
    let (ctx, cancel) = RunContext::unbounded();
    cancel.cancel();

    let err = orchestrator(OrganizationConfig::default(), &provider)
        .run(&ctx)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(provider.calls().is_empty());
}

/// Fails at once without touching the provider.
struct RejectedStage;

#[async_trait]
impl Stage for RejectedStage {
    fn name(&self) -> &'static str {
        "roles"
    }

    async fn apply(&self, _env: &StageEnv) -> anyhow::Result<StageReport> {
        anyhow::bail!("trust policy rejected")
    }
}

/// Sleeps, then optionally makes one provider call.
struct SlowStage {
    delay: Duration,
    call_provider: bool,
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &'static str {
        "networking"
    }

    async fn apply(&self, env: &StageEnv) -> anyhow::Result<StageReport> {
        tokio::time::sleep(self.delay).await;
        if self.call_provider {
            env.call("create_vpc(10.0.0.0/16)", || {
                env.provider.create_vpc("10.0.0.0/16", &env.config.tags)
            })
            .await?;
        }
        Ok(StageReport::new(self.name()))
    }
}

#[tokio::test(start_paused = true)]
async fn stage_failure_is_reported_when_another_stage_overruns_deadline() {
    let provider = Arc::new(SimulatedProvider::new());
    let stages = StageRunner::new().with_stage(RejectedStage).with_stage(SlowStage {
        delay: Duration::from_secs(10),
        call_provider: false,
    });
    let (ctx, _cancel) = RunContext::new(Duration::from_secs(5));

    let err = orchestrator(OrganizationConfig::default(), &provider)
        .with_stages(stages)
        .run(&ctx)
        .await
        .unwrap_err();

    assert_eq!(phase_of(&err), Some(Phase::Stages));
    assert!(!err.is_cancelled(), "stage failure was hidden: {err}");
    let OrgError::Stages(aggregate) = err.root() else {
        panic!("expected the stage aggregate, got {err}");
    };
    assert_eq!(aggregate.stage_names(), vec!["roles"]);
    assert!(!aggregate.failures[0].cancelled);
    assert!(err.to_string().contains("trust policy rejected"));
}

#[tokio::test(start_paused = true)]
async fn stages_stopped_only_by_deadline_report_cancellation() {
    let provider = Arc::new(SimulatedProvider::new());
    let stages = StageRunner::new().with_stage(SlowStage {
        delay: Duration::from_secs(10),
        call_provider: true,
    });
    let (ctx, _cancel) = RunContext::new(Duration::from_secs(5));

    let err = orchestrator(OrganizationConfig::default(), &provider)
        .with_stages(stages)
        .run(&ctx)
        .await
        .unwrap_err();

    assert_eq!(phase_of(&err), Some(Phase::Stages));
    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert_eq!(provider.call_count("create_vpc"), 0);
}
