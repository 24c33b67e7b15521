//! Guardrail policies attached to the organization root.
//!
//! Each enabled guardrail id maps to one deny-style policy document. Further
//! policies are derived from the security toggles in the configuration.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{Stage, StageEnv, StageReport};
use crate::config::LandingZoneConfig;

/// Actions that are global and must stay reachable under a region deny.
const GLOBAL_SERVICES: [&str; 6] = [
    "iam:*",
    "organizations:*",
    "route53:*",
    "cloudfront:*",
    "support:*",
    "sts:*",
];

#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailPolicy {
    pub name: String,
    pub document: Value,
}

fn deny(sid: &str, action: Value, condition: Option<Value>) -> Value {
    let mut statement = json!({
        "Sid": sid,
        "Effect": "Deny",
        "Action": action,
        "Resource": "*",
    });
    if let Some(condition) = condition {
        statement["Condition"] = condition;
    }
    json!({ "Version": "2012-10-17", "Statement": [statement] })
}

/// Document for a named guardrail, or `None` if the id is unknown.
pub fn known_guardrail(id: &str) -> Option<Value> {
    let document = match id {
        "AWS-GR_RESTRICT_ROOT_USER" => deny(
            "RestrictRootUser",
            json!("*"),
            Some(json!({ "StringLike": { "aws:PrincipalArn": "arn:aws:iam::*:root" } })),
        ),
        "AWS-GR_ENCRYPTED_VOLUMES" => deny(
            "RequireEncryptedVolumes",
            json!("ec2:CreateVolume"),
            Some(json!({ "Bool": { "ec2:Encrypted": "false" } })),
        ),
        "AWS-GR_AUDIT_BUCKET_PUBLIC_READ_PROHIBITED" => deny(
            "DenyPublicBucketAcl",
            json!(["s3:PutBucketAcl", "s3:PutObjectAcl"]),
            Some(json!({ "StringEquals": { "s3:x-amz-acl": ["public-read", "public-read-write"] } })),
        ),
        "AWS-GR_CLOUDTRAIL_ENABLED" => deny(
            "ProtectCloudTrail",
            json!(["cloudtrail:StopLogging", "cloudtrail:DeleteTrail"]),
            None,
        ),
        _ => return None,
    };
    Some(document)
}

/// Every policy the stage creates, in creation order.
///
/// Fails on a guardrail id with no known document.
pub fn guardrail_policies(config: &LandingZoneConfig) -> anyhow::Result<Vec<GuardrailPolicy>> {
    let mut policies = Vec::new();

    for id in &config.enabled_guardrails {
        let Some(document) = known_guardrail(id) else {
            bail!("unknown guardrail {id}");
        };
        policies.push(GuardrailPolicy {
            name: id.clone(),
            document,
        });
    }

    if config.require_mfa {
        policies.push(GuardrailPolicy {
            name: "require-mfa".to_string(),
            document: deny(
                "RequireMfa",
                json!("*"),
                Some(json!({ "BoolIfExists": { "aws:MultiFactorAuthPresent": "false" } })),
            ),
        });
    }

    if config.enable_ssl_requests {
        policies.push(GuardrailPolicy {
            name: "deny-insecure-transport".to_string(),
            document: deny(
                "DenyInsecureTransport",
                json!("*"),
                Some(json!({ "Bool": { "aws:SecureTransport": "false" } })),
            ),
        });
    }

    if !config.allowed_regions.is_empty() {
        let mut document = deny(
            "DenyOutsideAllowedRegions",
            Value::Null,
            Some(json!({ "StringNotEquals": { "aws:RequestedRegion": config.allowed_regions } })),
        );
        let statement = &mut document["Statement"][0];
        if let Some(map) = statement.as_object_mut() {
            map.remove("Action");
            map.insert("NotAction".to_string(), json!(GLOBAL_SERVICES));
        }
        policies.push(GuardrailPolicy {
            name: "region-deny".to_string(),
            document,
        });
    }

    if !config.allowed_ip_ranges.is_empty() {
        policies.push(GuardrailPolicy {
            name: "ip-allow-list".to_string(),
            document: deny(
                "DenyOutsideAllowedRanges",
                json!("*"),
                Some(json!({ "NotIpAddressIfExists": { "aws:SourceIp": config.allowed_ip_ranges } })),
            ),
        });
    }

    if !config.restricted_services.is_empty() {
        let actions: Vec<String> = config
            .restricted_services
            .iter()
            .map(|service| format!("{service}:*"))
            .collect();
        policies.push(GuardrailPolicy {
            name: "restricted-services".to_string(),
            document: deny("DenyRestrictedServices", json!(actions), None),
        });
    }

    Ok(policies)
}

pub struct GuardrailStage;

#[async_trait]
impl Stage for GuardrailStage {
    fn name(&self) -> &'static str {
        "guardrails"
    }

    async fn apply(&self, env: &StageEnv) -> anyhow::Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let root_id = &env.organization.root_id;

        for policy in guardrail_policies(&env.config)? {
            let document = policy.document.to_string();
            let created = env
                .call(&format!("create_guardrail_policy({})", policy.name), || {
                    env.provider
                        .create_guardrail_policy(&policy.name, &document, &env.config.tags)
                })
                .await
                .with_context(|| format!("creating guardrail {}", policy.name))?;

            env.call(&format!("attach_policy({})", policy.name), || {
                env.provider.attach_policy(&created.id, root_id)
            })
            .await
            .with_context(|| format!("attaching guardrail {} to {root_id}", policy.name))?;

            info!(guardrail = %policy.name, policy_id = %created.id, "guardrail attached");
            report.record(created.id);
        }

        Ok(report)
    }
}
