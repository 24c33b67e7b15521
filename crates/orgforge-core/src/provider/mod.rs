//! Cloud provider boundary.
//!
//! The orchestrator only sequences and protects these calls; it never knows
//! how a resource is materialized. [`simulated::SimulatedProvider`] is an
//! in-process implementation used by the CLI and tests.

pub mod simulated;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use crate::domain::ProviderError;
pub use simulated::SimulatedProvider;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

pub type Tags = BTreeMap<String, String>;

/// Identity of a created resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationInfo {
    pub id: String,
    pub arn: String,
    pub root_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogTrailRequest {
    pub name: String,
    pub bucket: String,
    pub log_group_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_key_arn: Option<String>,
    pub tags: Tags,
}

/// Remote operations the orchestrator needs.
///
/// Implementations must be safe to call concurrently from several stages.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create_organization(&self, policy_types: &[String]) -> ProviderResult<OrganizationInfo>;

    async fn create_organizational_unit(
        &self,
        name: &str,
        parent_id: &str,
        tags: &Tags,
    ) -> ProviderResult<ResourceRef>;

    async fn create_account(
        &self,
        name: &str,
        email: &str,
        parent_id: &str,
        tags: &Tags,
    ) -> ProviderResult<ResourceRef>;

    async fn create_encryption_key(&self, policy: &str, tags: &Tags) -> ProviderResult<ResourceRef>;

    async fn create_key_alias(&self, alias: &str, key_id: &str) -> ProviderResult<()>;

    async fn create_role(
        &self,
        name: &str,
        path: &str,
        trust_policy: &str,
        tags: &Tags,
    ) -> ProviderResult<ResourceRef>;

    async fn attach_role_policy(&self, role_arn: &str, policy_arn: &str) -> ProviderResult<()>;

    async fn create_log_trail(&self, request: &LogTrailRequest) -> ProviderResult<ResourceRef>;

    async fn create_guardrail_policy(
        &self,
        name: &str,
        document: &str,
        tags: &Tags,
    ) -> ProviderResult<ResourceRef>;

    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> ProviderResult<()>;

    async fn create_vpc(&self, cidr: &str, tags: &Tags) -> ProviderResult<ResourceRef>;

    async fn create_subnet(
        &self,
        vpc_id: &str,
        name: &str,
        cidr: &str,
        availability_zone: &str,
        tags: &Tags,
    ) -> ProviderResult<ResourceRef>;

    async fn put_parameter(
        &self,
        path: &str,
        value: &str,
        secure: bool,
        tags: &Tags,
    ) -> ProviderResult<()>;

    async fn get_parameter(&self, path: &str) -> ProviderResult<String>;

    // Inverse operations, used to unwind a failed run.

    async fn delete_organization(&self, id: &str) -> ProviderResult<()>;

    async fn delete_organizational_unit(&self, id: &str) -> ProviderResult<()>;

    async fn close_account(&self, id: &str) -> ProviderResult<()>;

    async fn delete_parameter(&self, path: &str) -> ProviderResult<()>;
}
