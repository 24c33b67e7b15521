//! Inverse actions recorded during a run and replayed when it fails.
//!
//! Actions are pushed as resources are created and executed last-in first-out,
//! so children are removed before their parents. Unwinding calls the provider
//! directly: it must still run after the deadline has passed. Failures are
//! logged and never replace the error that caused the unwind.

use tracing::info;

use crate::obs;
use crate::provider::{CloudProvider, ProviderResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    DeleteOrganization { id: String },
    DeleteOrganizationalUnit { id: String, name: String },
    CloseAccount { id: String, name: String },
    DeleteParameter { path: String },
}

impl CleanupAction {
    pub fn describe(&self) -> String {
        match self {
            CleanupAction::DeleteOrganization { id } => format!("delete organization {id}"),
            CleanupAction::DeleteOrganizationalUnit { id, name } => {
                format!("delete organizational unit {name} ({id})")
            }
            CleanupAction::CloseAccount { id, name } => format!("close account {name} ({id})"),
            CleanupAction::DeleteParameter { path } => format!("delete parameter {path}"),
        }
    }

    pub async fn execute(&self, provider: &dyn CloudProvider) -> ProviderResult<()> {
        match self {
            CleanupAction::DeleteOrganization { id } => provider.delete_organization(id).await,
            CleanupAction::DeleteOrganizationalUnit { id, .. } => {
                provider.delete_organizational_unit(id).await
            }
            CleanupAction::CloseAccount { id, .. } => provider.close_account(id).await,
            CleanupAction::DeleteParameter { path } => provider.delete_parameter(path).await,
        }
    }
}

/// Outcome of [`CleanupStack::unwind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnwindReport {
    pub completed: usize,
    /// `(action, error)` for every action that failed.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct CleanupStack {
    actions: Vec<CleanupAction>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: CleanupAction) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action, newest first, and empty the stack.
    ///
    /// Each action is attempted once; a failure does not stop the rest.
    pub async fn unwind(&mut self, provider: &dyn CloudProvider, run_id: &str) -> UnwindReport {
        let mut report = UnwindReport::default();
        info!(actions = self.actions.len(), "unwinding created resources");

        while let Some(action) = self.actions.pop() {
            let description = action.describe();
            match action.execute(provider).await {
                Ok(()) => report.completed += 1,
                Err(e) => {
                    obs::emit_cleanup_failed(run_id, &description, &e);
                    report.failed.push((description, e.to_string()));
                }
            }
        }

        report
    }
}
