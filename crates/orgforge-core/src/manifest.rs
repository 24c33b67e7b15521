//! Landing-zone manifest.
//!
//! Written once per successful run to `/landing-zone/manifest` for
//! downstream auditing. Nothing in this crate reads it back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::LandingZoneConfig;
use crate::domain::{AccountRecord, OuTree, Result};
use crate::resilience::CallGuard;
use crate::provider::CloudProvider;

pub const MANIFEST_PARAMETER_PATH: &str = "/landing-zone/manifest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandingZoneManifest {
    pub governed_regions: Vec<String>,
    pub organization_structure: BTreeMap<String, OuDescriptor>,
    pub centralized_logging: CentralizedLogging,
    pub access_management: AccessManagement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OuDescriptor {
    pub id: String,
    pub arn: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, OuDescriptor>,
    /// Names of accounts directly under this OU.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CentralizedLogging {
    pub enabled: bool,
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessManagement {
    pub enabled: bool,
}

impl LandingZoneManifest {
    pub fn build(config: &LandingZoneConfig, tree: &OuTree, accounts: &[AccountRecord]) -> Self {
        let organization_structure = (0..tree.len())
            .filter(|&i| tree.parent_of(i).is_none())
            .filter_map(|i| Some((tree.get(i)?.name.clone(), descriptor(tree, i, accounts)?)))
            .collect();

        Self {
            governed_regions: config.governed_regions.clone(),
            organization_structure,
            centralized_logging: CentralizedLogging {
                enabled: config.enable_cloud_trail,
                retention_days: config.log_retention_days,
            },
            access_management: AccessManagement {
                enabled: config.require_mfa,
            },
        }
    }

    /// Store the manifest as a secure parameter.
    pub async fn publish(
        &self,
        provider: &dyn CloudProvider,
        guard: &CallGuard,
        config: &LandingZoneConfig,
    ) -> Result<()> {
        let value = serde_json::to_string(self)?;
        guard
            .call(&format!("put_parameter({MANIFEST_PARAMETER_PATH})"), || {
                provider.put_parameter(MANIFEST_PARAMETER_PATH, &value, true, &config.tags)
            })
            .await?;
        info!(
            top_level_ous = self.organization_structure.len(),
            "landing-zone manifest published"
        );
        Ok(())
    }
}

fn descriptor(tree: &OuTree, index: usize, accounts: &[AccountRecord]) -> Option<OuDescriptor> {
    let node = tree.get(index)?;
    let children = tree
        .children_of(index)
        .into_iter()
        .filter_map(|child| Some((tree.get(child)?.name.clone(), descriptor(tree, child, accounts)?)))
        .collect();
    let accounts = accounts
        .iter()
        .filter(|a| a.parent_ou_id == node.id)
        .map(|a| a.name.clone())
        .collect();

    Some(OuDescriptor {
        id: node.id.clone(),
        arn: node.arn.clone(),
        children,
        accounts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OuNode;

    fn node(id: &str, name: &str, parent: &str) -> OuNode {
        OuNode {
            id: id.to_string(),
            arn: format!("arn:sim:ou::{id}"),
            name: name.to_string(),
            parent_id: parent.to_string(),
        }
    }

    #[test]
    fn structure_is_nested_by_name() {
        let mut tree = OuTree::new();
        tree.push(node("ou-1", "Security", "r-0"), None);
        let w = tree.push(node("ou-2", "Workloads", "r-0"), None);
        tree.push(node("ou-3", "Production", "ou-2"), Some(w));
        let accounts = vec![AccountRecord::new("AFT-Management", "aft@example.com", "ou-1")];

        let manifest = LandingZoneManifest::build(&LandingZoneConfig::default(), &tree, &accounts);

        assert_eq!(manifest.organization_structure.len(), 2);
        assert_eq!(manifest.organization_structure["Security"].accounts, vec!["AFT-Management"]);
        assert_eq!(
            manifest.organization_structure["Workloads"].children["Production"].id,
            "ou-3"
        );

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["centralizedLogging"]["retentionDays"], 90);
        assert_eq!(json["accessManagement"]["enabled"], true);
        assert_eq!(json["governedRegions"][0], "us-east-1");
    }
}
