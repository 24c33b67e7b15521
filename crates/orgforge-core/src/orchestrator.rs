//! Provisioning run sequencing.
//!
//! validate, create organization, build every top-level OU tree, create
//! accounts, run the landing-zone stages, publish the manifest, save state.
//! Every resource created after the organization gets an inverse action on
//! the run's [`CleanupStack`]; if a later step fails the stack is unwound and
//! the original error is returned, tagged with the failing [`Phase`].

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};

use crate::accounts::{account_parameter_path, AccountProvisioner};
use crate::cleanup::{CleanupAction, CleanupStack};
use crate::config::OrganizationConfig;
use crate::context::RunContext;
use crate::domain::{
    AccountRecord, OrgError, OuRegistry, OuSpec, OuTree, Phase, Result, StateSnapshot,
};
use crate::hierarchy::{ou_parameter_path, HierarchyBuilder};
use crate::manifest::{LandingZoneManifest, MANIFEST_PARAMETER_PATH};
use crate::obs;
use crate::provider::{CloudProvider, OrganizationInfo};
use crate::resilience::{CallGuard, RateLimiter};
use crate::stages::{StageEnv, StageReport, StageRunner};
use crate::state_store::StateStore;

pub const ORGANIZATION_INFO_PATH: &str = "/organization/info";
pub const SNAPSHOT_COMPONENT: &str = "organization";
pub const ORGANIZATION_POLICY_TYPES: [&str; 2] = ["SERVICE_CONTROL_POLICY", "TAG_POLICY"];

/// Everything a successful run created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningOutcome {
    pub run_id: String,
    pub organization: OrganizationInfo,
    pub topology: OuRegistry,
    pub accounts: Vec<AccountRecord>,
    pub stages: Vec<StageReport>,
    pub manifest: LandingZoneManifest,
    /// Sort key of the saved snapshot.
    pub snapshot_key: String,
}

pub struct Orchestrator {
    config: Arc<OrganizationConfig>,
    provider: Arc<dyn CloudProvider>,
    state: Arc<StateStore>,
    stages: StageRunner,
}

fn in_phase<E: Into<OrgError>>(phase: Phase) -> impl FnOnce(E) -> OrgError {
    move |e| e.into().in_phase(phase)
}

impl Orchestrator {
    pub fn new(
        config: OrganizationConfig,
        provider: Arc<dyn CloudProvider>,
        state: Arc<StateStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            state,
            stages: StageRunner::landing_zone(),
        }
    }

    /// Replace the landing-zone stages.
    pub fn with_stages(mut self, stages: StageRunner) -> Self {
        self.stages = stages;
        self
    }

    pub fn config(&self) -> &OrganizationConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Execute one provisioning run bounded by `ctx`.
    pub async fn run(&self, ctx: &RunContext) -> Result<ProvisioningOutcome> {
        let span = obs::run_span(ctx.run_id());
        self.run_in_span(ctx).instrument(span).await
    }

    async fn run_in_span(&self, ctx: &RunContext) -> Result<ProvisioningOutcome> {
        let started = Instant::now();
        let specs = self.config.landing_zone.top_level_specs();
        obs::emit_run_started(
            ctx.run_id(),
            specs.len(),
            self.config.landing_zone.governed_regions.len(),
        );

        let mut cleanup = CleanupStack::new();
        let result = self.provision(ctx, &specs, &mut cleanup).await;

        if let Err(err) = &result {
            warn!(error = %err, "provisioning failed");
            if !cleanup.is_empty() {
                let report = cleanup.unwind(self.provider.as_ref(), ctx.run_id()).await;
                info!(
                    completed = report.completed,
                    failed = report.failed.len(),
                    "cleanup finished"
                );
            }
        }

        obs::emit_run_finished(
            ctx.run_id(),
            started.elapsed().as_millis() as u64,
            result.is_ok(),
        );
        ctx.metrics().flush(ctx.run_id());
        result
    }

    async fn provision(
        &self,
        ctx: &RunContext,
        specs: &[OuSpec],
        cleanup: &mut CleanupStack,
    ) -> Result<ProvisioningOutcome> {
        let run_id = ctx.run_id();
        let lz = &self.config.landing_zone;

        let phase_started = Instant::now();
        self.config.validate().map_err(in_phase(Phase::Validation))?;
        ctx.check().map_err(in_phase(Phase::Validation))?;
        finish(run_id, Phase::Validation, phase_started);

        let limiter = Arc::new(RateLimiter::from_config(&self.config.runtime.rate_limit));
        let guard = CallGuard::new(ctx.clone(), limiter, self.config.runtime.retry.clone());

        let phase_started = Instant::now();
        let organization = self
            .create_organization(&guard, cleanup)
            .await
            .map_err(in_phase(Phase::Organization))?;
        finish(run_id, Phase::Organization, phase_started);

        let phase_started = Instant::now();
        let tree = self
            .build_hierarchy(&guard, &organization, specs, cleanup)
            .await
            .map_err(in_phase(Phase::Hierarchy))?;
        let registry = tree.to_registry().map_err(in_phase(Phase::Hierarchy))?;
        finish(run_id, Phase::Hierarchy, phase_started);

        let phase_started = Instant::now();
        let accounts = self
            .provision_accounts(&guard, specs, &registry, cleanup)
            .await
            .map_err(in_phase(Phase::Accounts))?;
        finish(run_id, Phase::Accounts, phase_started);

        let phase_started = Instant::now();
        ctx.check().map_err(in_phase(Phase::Stages))?;
        let env = Arc::new(StageEnv {
            provider: Arc::clone(&self.provider),
            guard: guard.clone(),
            config: Arc::new(lz.clone()),
            organization: organization.clone(),
        });
        let stages = match self.stages.run(env).await {
            Ok(reports) => reports,
            Err(aggregate) => {
                // Report plain cancellation only when no stage failed on its own.
                let err = match ctx.check() {
                    Err(cancelled) if aggregate.all_cancelled() => OrgError::from(cancelled),
                    _ => OrgError::from(aggregate),
                };
                return Err(err.in_phase(Phase::Stages));
            }
        };
        finish(run_id, Phase::Stages, phase_started);

        let phase_started = Instant::now();
        let manifest = LandingZoneManifest::build(lz, &tree, &accounts);
        manifest
            .publish(self.provider.as_ref(), &guard, lz)
            .await
            .map_err(in_phase(Phase::Manifest))?;
        cleanup.push(CleanupAction::DeleteParameter {
            path: MANIFEST_PARAMETER_PATH.to_string(),
        });
        finish(run_id, Phase::Manifest, phase_started);

        let phase_started = Instant::now();
        ctx.check().map_err(in_phase(Phase::StateSave))?;
        let snapshot = StateSnapshot::new(self.config.version.clone(), SNAPSHOT_COMPONENT, registry.clone())
            .with_tags(lz.tags.clone());
        let snapshot_key = self
            .state
            .save(&snapshot)
            .await
            .map_err(in_phase(Phase::StateSave))?;
        finish(run_id, Phase::StateSave, phase_started);

        info!(
            organization = %organization.id,
            ous = registry.len(),
            accounts = accounts.len(),
            snapshot = %snapshot_key,
            "provisioning complete"
        );

        Ok(ProvisioningOutcome {
            run_id: run_id.to_string(),
            organization,
            topology: registry,
            accounts,
            stages,
            manifest,
            snapshot_key,
        })
    }

    async fn create_organization(
        &self,
        guard: &CallGuard,
        cleanup: &mut CleanupStack,
    ) -> Result<OrganizationInfo> {
        let policy_types: Vec<String> = ORGANIZATION_POLICY_TYPES.iter().map(|s| s.to_string()).collect();
        let provider = &self.provider;

        let organization = guard
            .call("create_organization", || provider.create_organization(&policy_types))
            .await?;
        cleanup.push(CleanupAction::DeleteOrganization {
            id: organization.id.clone(),
        });
        info!(id = %organization.id, root_id = %organization.root_id, "created organization");

        let value = serde_json::to_string(&organization)?;
        let tags = &self.config.landing_zone.tags;
        guard
            .call(&format!("put_parameter({ORGANIZATION_INFO_PATH})"), || {
                provider.put_parameter(ORGANIZATION_INFO_PATH, &value, false, tags)
            })
            .await?;
        cleanup.push(CleanupAction::DeleteParameter {
            path: ORGANIZATION_INFO_PATH.to_string(),
        });

        Ok(organization)
    }

    /// Build every top-level tree in order under the organization root.
    ///
    /// Nodes created before a failure stay in the cleanup stack.
    async fn build_hierarchy(
        &self,
        guard: &CallGuard,
        organization: &OrganizationInfo,
        specs: &[OuSpec],
        cleanup: &mut CleanupStack,
    ) -> Result<OuTree> {
        let builder = HierarchyBuilder::new(Arc::clone(&self.provider), guard.clone());
        let mut tree = OuTree::new();

        for spec in specs {
            let before = tree.len();
            let built = builder.build_into(&organization.root_id, spec, &mut tree).await;
            for node in tree.nodes().skip(before) {
                cleanup.push(CleanupAction::DeleteOrganizationalUnit {
                    id: node.id.clone(),
                    name: node.name.clone(),
                });
                cleanup.push(CleanupAction::DeleteParameter {
                    path: ou_parameter_path(&node.name),
                });
            }
            built?;
        }

        Ok(tree)
    }

    async fn provision_accounts(
        &self,
        guard: &CallGuard,
        specs: &[OuSpec],
        registry: &OuRegistry,
        cleanup: &mut CleanupStack,
    ) -> Result<Vec<AccountRecord>> {
        let provisioner = AccountProvisioner::new(Arc::clone(&self.provider), guard.clone());
        let mut accounts = Vec::new();
        let provisioned = provisioner
            .provision_declared(specs, registry, &mut accounts)
            .await;

        for account in &accounts {
            if let Some(id) = &account.id {
                cleanup.push(CleanupAction::CloseAccount {
                    id: id.clone(),
                    name: account.name.clone(),
                });
                cleanup.push(CleanupAction::DeleteParameter {
                    path: account_parameter_path(&account.name),
                });
            }
        }

        provisioned?;
        Ok(accounts)
    }
}

fn finish(run_id: &str, phase: Phase, started: Instant) {
    obs::emit_phase_finished(run_id, phase.as_str(), started.elapsed().as_millis() as u64);
}
