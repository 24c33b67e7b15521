//! In-process provider with deterministic ids and scripted failures.
//!
//! Ids are sequential per resource kind (`ou-1`, `ou-2`, ...); the
//! organization root is always `r-0`. Every call is recorded so tests can
//! assert on ordering and attempt counts.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::{
    CloudProvider, LogTrailRequest, OrganizationInfo, ProviderError, ProviderResult, ResourceRef,
    Tags,
};

pub const SIMULATED_ROOT_ID: &str = "r-0";
const SIMULATED_ACCOUNT: &str = "000000000000";

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub operation: &'static str,
    pub target: String,
}

#[derive(Debug, Clone)]
struct Failure {
    remaining: u32,
    error: ProviderError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredParameter {
    pub value: String,
    pub secure: bool,
}

#[derive(Debug, Default)]
struct SimState {
    counters: HashMap<&'static str, u64>,
    calls: Vec<ProviderCall>,
    failures: HashMap<String, Failure>,
    parameters: BTreeMap<String, StoredParameter>,
    deleted: Vec<String>,
}

impl SimState {
    fn next_id(&mut self, kind: &'static str) -> String {
        let n = self.counters.entry(kind).or_default();
        *n += 1;
        format!("{kind}-{n}")
    }

    fn take_failure(&mut self, key: &str) -> Option<ProviderError> {
        let failure = self.failures.get_mut(key)?;
        if failure.remaining == 0 {
            return None;
        }
        if failure.remaining != u32::MAX {
            failure.remaining -= 1;
        }
        Some(failure.error.clone())
    }
}

fn arn(kind: &str, id: &str) -> String {
    format!("arn:sim:{kind}::{SIMULATED_ACCOUNT}:{id}")
}

#[derive(Debug, Default)]
pub struct SimulatedProvider {
    state: Mutex<SimState>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call take `latency` before it completes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `times` calls of `operation`, whatever their target.
    pub fn fail_next(&self, operation: &str, times: u32, error: ProviderError) {
        self.lock().failures.insert(
            operation.to_string(),
            Failure {
                remaining: times,
                error,
            },
        );
    }

    /// Fail every call of `operation` until [`SimulatedProvider::clear_failures`].
    pub fn fail_always(&self, operation: &str, error: ProviderError) {
        self.fail_next(operation, u32::MAX, error);
    }

    /// Fail the next `times` calls of `operation` aimed at `target`
    /// (an OU or account name, a role name, a parameter path).
    pub fn fail_target(&self, operation: &str, target: &str, times: u32, error: ProviderError) {
        self.fail_next(&format!("{operation}:{target}"), times, error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls of `operation`, failed or not.
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Targets of `operation` in call order.
    pub fn targets(&self, operation: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.target.clone())
            .collect()
    }

    pub fn parameter(&self, path: &str) -> Option<StoredParameter> {
        self.lock().parameters.get(path).cloned()
    }

    pub fn parameter_paths(&self) -> Vec<String> {
        self.lock().parameters.keys().cloned().collect()
    }

    /// Ids and paths removed by the inverse operations, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, operation: &'static str, target: &str) -> ProviderResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        trace!(operation, target, "simulated provider call");
        let mut state = self.lock();
        state.calls.push(ProviderCall {
            operation,
            target: target.to_string(),
        });
        let scripted = state
            .take_failure(&format!("{operation}:{target}"))
            .or_else(|| state.take_failure(operation));
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn create(&self, kind: &'static str) -> ResourceRef {
        let id = self.lock().next_id(kind);
        ResourceRef {
            arn: arn(kind, &id),
            id,
        }
    }

    fn record_delete(&self, id: &str) {
        self.lock().deleted.push(id.to_string());
    }
}

#[async_trait]
impl CloudProvider for SimulatedProvider {
    async fn create_organization(&self, policy_types: &[String]) -> ProviderResult<OrganizationInfo> {
        self.enter("create_organization", &policy_types.join(",")).await?;
        let org = self.create("o");
        Ok(OrganizationInfo {
            id: org.id,
            arn: org.arn,
            root_id: SIMULATED_ROOT_ID.to_string(),
        })
    }

    async fn create_organizational_unit(
        &self,
        name: &str,
        _parent_id: &str,
        _tags: &Tags,
    ) -> ProviderResult<ResourceRef> {
        self.enter("create_organizational_unit", name).await?;
        Ok(self.create("ou"))
    }

    async fn create_account(
        &self,
        name: &str,
        _email: &str,
        _parent_id: &str,
        _tags: &Tags,
    ) -> ProviderResult<ResourceRef> {
        self.enter("create_account", name).await?;
        Ok(self.create("acct"))
    }

    async fn create_encryption_key(&self, _policy: &str, _tags: &Tags) -> ProviderResult<ResourceRef> {
        self.enter("create_encryption_key", "").await?;
        Ok(self.create("key"))
    }

    async fn create_key_alias(&self, alias: &str, _key_id: &str) -> ProviderResult<()> {
        self.enter("create_key_alias", alias).await
    }

    async fn create_role(
        &self,
        name: &str,
        path: &str,
        _trust_policy: &str,
        _tags: &Tags,
    ) -> ProviderResult<ResourceRef> {
        self.enter("create_role", name).await?;
        Ok(ResourceRef {
            id: name.to_string(),
            arn: arn("role", &format!("{path}{name}")),
        })
    }

    async fn attach_role_policy(&self, role_arn: &str, _policy_arn: &str) -> ProviderResult<()> {
        self.enter("attach_role_policy", role_arn).await
    }

    async fn create_log_trail(&self, request: &LogTrailRequest) -> ProviderResult<ResourceRef> {
        self.enter("create_log_trail", &request.name).await?;
        Ok(ResourceRef {
            id: request.name.clone(),
            arn: arn("trail", &request.name),
        })
    }

    async fn create_guardrail_policy(
        &self,
        name: &str,
        document: &str,
        _tags: &Tags,
    ) -> ProviderResult<ResourceRef> {
        self.enter("create_guardrail_policy", name).await?;
        if serde_json::from_str::<serde_json::Value>(document).is_err() {
            return Err(ProviderError::Rejected(format!(
                "policy {name} is not valid JSON"
            )));
        }
        Ok(self.create("p"))
    }

    async fn attach_policy(&self, policy_id: &str, _target_id: &str) -> ProviderResult<()> {
        self.enter("attach_policy", policy_id).await
    }

    async fn create_vpc(&self, cidr: &str, _tags: &Tags) -> ProviderResult<ResourceRef> {
        self.enter("create_vpc", cidr).await?;
        Ok(self.create("vpc"))
    }

    async fn create_subnet(
        &self,
        _vpc_id: &str,
        name: &str,
        _cidr: &str,
        _availability_zone: &str,
        _tags: &Tags,
    ) -> ProviderResult<ResourceRef> {
        self.enter("create_subnet", name).await?;
        Ok(self.create("subnet"))
    }

    async fn put_parameter(
        &self,
        path: &str,
        value: &str,
        secure: bool,
        _tags: &Tags,
    ) -> ProviderResult<()> {
        self.enter("put_parameter", path).await?;
        self.lock().parameters.insert(
            path.to_string(),
            StoredParameter {
                value: value.to_string(),
                secure,
            },
        );
        Ok(())
    }

    async fn get_parameter(&self, path: &str) -> ProviderResult<String> {
        self.enter("get_parameter", path).await?;
        self.lock()
            .parameters
            .get(path)
            .map(|p| p.value.clone())
            .ok_or_else(|| ProviderError::NotFound(path.to_string()))
    }

    async fn delete_organization(&self, id: &str) -> ProviderResult<()> {
        self.enter("delete_organization", id).await?;
        self.record_delete(id);
        Ok(())
    }

    async fn delete_organizational_unit(&self, id: &str) -> ProviderResult<()> {
        self.enter("delete_organizational_unit", id).await?;
        self.record_delete(id);
        Ok(())
    }

    async fn close_account(&self, id: &str) -> ProviderResult<()> {
        self.enter("close_account", id).await?;
        self.record_delete(id);
        Ok(())
    }

    async fn delete_parameter(&self, path: &str) -> ProviderResult<()> {
        self.enter("delete_parameter", path).await?;
        self.lock().parameters.remove(path);
        self.record_delete(path);
        Ok(())
    }
}
