//! StageRunner: run every stage, report every failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orgforge_core::domain::ProviderError;
use orgforge_core::provider::OrganizationInfo;
use orgforge_core::{
    CallGuard, LandingZoneConfig, RateLimiter, RetryPolicy, RunContext, SimulatedProvider, Stage,
    StageEnv, StageReport, StageRunner,
};

struct Scripted {
    name: &'static str,
    fail: bool,
    completed: Arc<AtomicUsize>,
}

#[async_trait]
impl Stage for Scripted {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn apply(&self, _env: &StageEnv) -> anyhow::Result<StageReport> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("{} could not be applied", self.name);
        }
        Ok(StageReport::new(self.name))
    }
}

fn env_with(provider: Arc<SimulatedProvider>, ctx: RunContext) -> Arc<StageEnv> {
    Arc::new(StageEnv {
        provider,
        guard: CallGuard::new(
            ctx,
            Arc::new(RateLimiter::new(100.0, 50)),
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
        ),
        config: Arc::new(LandingZoneConfig::default()),
        organization: OrganizationInfo {
            id: "o-1".to_string(),
            arn: "arn:sim:o::o-1".to_string(),
            root_id: "r-0".to_string(),
        },
    })
}

#[tokio::test(start_paused = true)]
async fn two_of_five_failing_are_both_reported() {
    let completed = Arc::new(AtomicUsize::new(0));
    let mut runner = StageRunner::new();
    for (name, fail) in [
        ("roles", false),
        ("encryption", true),
        ("logging", false),
        ("guardrails", true),
        ("networking", false),
    ] {
        runner = runner.with_stage(Scripted {
            name,
            fail,
            completed: Arc::clone(&completed),
        });
    }

    let (ctx, _h) = RunContext::unbounded();
    let err = runner
        .run(env_with(Arc::new(SimulatedProvider::new()), ctx.clone()))
        .await
        .unwrap_err();

    assert_eq!(completed.load(Ordering::SeqCst), 5);
    assert_eq!(err.stage_names(), vec!["encryption", "guardrails"]);
    let message = err.to_string();
    assert!(message.contains("2 of 5"), "{message}");
    assert!(message.contains("encryption could not be applied"));
    assert!(message.contains("guardrails could not be applied"));
    assert_eq!(ctx.metrics().stages_failed(), 2);
    assert_eq!(ctx.metrics().stages_succeeded(), 3);
}

#[tokio::test(start_paused = true)]
async fn landing_zone_stages_run_concurrently() {
    let provider = Arc::new(SimulatedProvider::new().with_latency(Duration::from_millis(50)));
    let (ctx, _h) = RunContext::unbounded();

    let reports = StageRunner::landing_zone()
        .run(env_with(Arc::clone(&provider), ctx))
        .await
        .unwrap();

    assert_eq!(reports.len(), 5);
    assert!(provider.max_concurrency() > 1);
    assert_eq!(provider.call_count("create_role"), 3);
    assert_eq!(provider.call_count("attach_role_policy"), 3);
    assert_eq!(provider.targets("create_key_alias"), vec!["alias/controltower"]);
    assert_eq!(provider.targets("create_log_trail"), vec!["aws-controltower-trail"]);
    assert_eq!(provider.call_count("attach_policy"), 4);
    assert_eq!(provider.targets("create_vpc"), vec!["10.0.0.0/16"]);
}

#[tokio::test(start_paused = true)]
async fn provider_failure_in_one_stage_leaves_others_applied() {
    let provider = Arc::new(SimulatedProvider::new());
    provider.fail_always("create_log_trail", ProviderError::Rejected("bucket missing".to_string()));
    let (ctx, _h) = RunContext::unbounded();

    let err = StageRunner::landing_zone()
        .run(env_with(Arc::clone(&provider), ctx))
        .await
        .unwrap_err();

    assert_eq!(err.stage_names(), vec!["logging"]);
    assert!(err.to_string().contains("bucket missing"));
    assert_eq!(provider.call_count("create_log_trail"), 2);
    assert_eq!(provider.call_count("create_role"), 3);
    assert_eq!(provider.call_count("create_vpc"), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_features_skip_their_stages() {
    let provider = Arc::new(SimulatedProvider::new());
    let (ctx, _h) = RunContext::unbounded();
    let mut config = LandingZoneConfig::default();
    config.enable_cloud_trail = false;
    config.vpc_settings = None;

    let mut env = env_with(Arc::clone(&provider), ctx);
    if let Some(env) = Arc::get_mut(&mut env) {
        env.config = Arc::new(config);
    }

    let reports = StageRunner::landing_zone().run(env).await.unwrap();
    let skipped: Vec<&str> = reports
        .iter()
        .filter(|r| r.skipped)
        .map(|r| r.stage.as_str())
        .collect();
    assert_eq!(skipped, vec!["logging", "networking"]);
    assert_eq!(provider.call_count("create_log_trail"), 0);
}
