//! Member account provisioning.
//!
//! Accounts are validated before any provider call, created under their
//! parent OU through the [`CallGuard`], and published as a secure parameter
//! at `/organization/accounts/<name>`.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::domain::{AccountRecord, AccountSpec, OrgError, OuRegistry, OuSpec, Result, ValidationError};
use crate::provider::CloudProvider;
use crate::resilience::CallGuard;

pub const ACCOUNT_PARAMETER_PREFIX: &str = "/organization/accounts";

pub fn account_parameter_path(name: &str) -> String {
    format!("{ACCOUNT_PARAMETER_PREFIX}/{name}")
}

pub struct AccountProvisioner {
    provider: Arc<dyn CloudProvider>,
    guard: CallGuard,
}

impl AccountProvisioner {
    pub fn new(provider: Arc<dyn CloudProvider>, guard: CallGuard) -> Self {
        Self { provider, guard }
    }

    /// Create one account under `parent_ou_id`.
    ///
    /// The created record is pushed to `out` before its side record is
    /// published, so a caller unwinding after a publish failure still knows
    /// the account exists.
    #[instrument(skip(self, spec, out), fields(account = %spec.name, parent = %parent_ou_id))]
    pub async fn provision(
        &self,
        spec: &AccountSpec,
        parent_ou_id: &str,
        out: &mut Vec<AccountRecord>,
    ) -> Result<()> {
        let mut record = AccountRecord::from_spec(spec, parent_ou_id);
        record.validate()?;

        let provider = &self.provider;
        let created = self
            .guard
            .call(&format!("create_account({})", record.name), || {
                provider.create_account(&record.name, &record.email, &record.parent_ou_id, &record.tags)
            })
            .await?;

        info!(account = %record.name, id = %created.id, "created account");
        self.guard.context().metrics().inc_accounts_created();
        record.id = Some(created.id);
        record.arn = Some(created.arn);
        record.resume();

        out.push(record.clone());
        self.publish(&record).await
    }

    /// Create every account declared on `specs`, in pre-order of their OUs.
    ///
    /// Parent ids come from `registry`; an OU missing from it is a
    /// [`ValidationError::MissingParent`].
    pub async fn provision_declared(
        &self,
        specs: &[OuSpec],
        registry: &OuRegistry,
        out: &mut Vec<AccountRecord>,
    ) -> Result<()> {
        for spec in specs {
            for node in spec.walk() {
                if node.accounts.is_empty() {
                    continue;
                }
                let parent = registry.get(&node.name).ok_or_else(|| {
                    ValidationError::MissingParent {
                        account: node.accounts[0].name.clone(),
                    }
                })?;
                for account in &node.accounts {
                    self.provision(account, &parent.id, out).await?;
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, record: &AccountRecord) -> Result<()> {
        let path = account_parameter_path(&record.name);
        let value = serde_json::to_string(record).map_err(OrgError::from)?;
        let provider = &self.provider;
        self.guard
            .call(&format!("put_parameter({path})"), || {
                provider.put_parameter(&path, &value, true, &record.tags)
            })
            .await
    }
}
