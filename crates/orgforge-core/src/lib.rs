//! orgforge core library
//!
//! Builds an organization's OU hierarchy, applies the landing-zone baseline
//! and records the resulting topology. Every provider call is rate limited
//! and retried; the run is bounded by one deadline.

pub mod accounts;
pub mod cleanup;
pub mod config;
pub mod context;
pub mod domain;
pub mod hierarchy;
pub mod manifest;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod provider;
pub mod resilience;
pub mod stages;
pub mod state_store;
pub mod telemetry;

pub use domain::{
    AccountRecord, AccountSpec, AccountStatus, AggregateStageError, BackupRecord, Cancelled,
    CleanupReport, OrgError, OuNode, OuRegistry, OuSpec, OuTree, PersistenceError, Phase,
    ProviderError, Result, StageFailure, StateSnapshot, ValidationError,
};

pub use accounts::AccountProvisioner;
pub use cleanup::{CleanupAction, CleanupStack, UnwindReport};
pub use config::{
    LandingZoneConfig, OrganizationConfig, RateLimitConfig, RuntimeConfig, StateStoreConfig,
    SubnetConfig, VpcConfig,
};
pub use context::{CancelHandle, RunContext};
pub use hierarchy::HierarchyBuilder;
pub use manifest::LandingZoneManifest;
pub use metrics::RunMetrics;
pub use orchestrator::{Orchestrator, ProvisioningOutcome};
pub use provider::{CloudProvider, OrganizationInfo, ResourceRef, SimulatedProvider};
pub use resilience::{CallGuard, RateLimiter, RetryError, RetryExecutor, RetryPolicy};
pub use stages::{Stage, StageEnv, StageReport, StageRunner};
pub use state_store::StateStore;
pub use telemetry::init_tracing;
