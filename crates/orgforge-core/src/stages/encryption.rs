//! Landing-zone encryption key and its alias.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{Stage, StageEnv, StageReport};
use crate::config::LandingZoneConfig;

/// Key policy granting the management account full control and letting
/// CloudTrail encrypt log files.
pub fn key_policy(config: &LandingZoneConfig) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "EnableRootPermissions",
                "Effect": "Allow",
                "Principal": {
                    "AWS": format!("arn:aws:iam::{}:root", config.management_account_id)
                },
                "Action": "kms:*",
                "Resource": "*"
            },
            {
                "Sid": "AllowCloudTrailEncrypt",
                "Effect": "Allow",
                "Principal": { "Service": "cloudtrail.amazonaws.com" },
                "Action": ["kms:GenerateDataKey*", "kms:DescribeKey"],
                "Resource": "*"
            }
        ]
    })
    .to_string()
}

pub fn alias_name(config: &LandingZoneConfig) -> String {
    format!("alias/{}", config.kms_key_alias)
}

pub struct EncryptionStage;

#[async_trait]
impl Stage for EncryptionStage {
    fn name(&self) -> &'static str {
        "encryption"
    }

    async fn apply(&self, env: &StageEnv) -> anyhow::Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let policy = key_policy(&env.config);

        let key = env
            .call("create_encryption_key", || {
                env.provider.create_encryption_key(&policy, &env.config.tags)
            })
            .await
            .context("creating landing-zone key")?;

        let alias = alias_name(&env.config);
        env.call(&format!("create_key_alias({alias})"), || {
            env.provider.create_key_alias(&alias, &key.id)
        })
        .await
        .with_context(|| format!("creating alias {alias}"))?;

        info!(key_id = %key.id, alias = %alias, "encryption key ready");
        report.record(key.arn);
        report.record(alias);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_alias() {
        assert_eq!(alias_name(&LandingZoneConfig::default()), "alias/controltower");
    }

    #[test]
    fn policy_names_management_account() {
        let config = LandingZoneConfig::default();
        let doc: serde_json::Value = serde_json::from_str(&key_policy(&config)).unwrap();
        assert_eq!(
            doc["Statement"][0]["Principal"]["AWS"],
            "arn:aws:iam::111111111111:root"
        );
    }
}
