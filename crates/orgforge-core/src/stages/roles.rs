//! Service roles for the landing zone.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{Stage, StageEnv, StageReport};

pub const SERVICE_ROLE_PATH: &str = "/service-role/";

/// A service role: who may assume it and which managed policy it gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleDefinition {
    pub name: &'static str,
    pub service: &'static str,
    pub policy_arn: &'static str,
}

pub const LANDING_ZONE_ROLES: [RoleDefinition; 3] = [
    RoleDefinition {
        name: "AWSControlTowerAdmin",
        service: "controltower.amazonaws.com",
        policy_arn: "arn:aws:iam::aws:policy/service-role/AWSControlTowerServiceRolePolicy",
    },
    RoleDefinition {
        name: "AWSControlTowerCloudTrail",
        service: "cloudtrail.amazonaws.com",
        policy_arn: "arn:aws:iam::aws:policy/service-role/AWSControlTowerCloudTrailRolePolicy",
    },
    RoleDefinition {
        name: "AWSControlTowerStackSet",
        service: "cloudformation.amazonaws.com",
        policy_arn: "arn:aws:iam::aws:policy/service-role/AWSControlTowerStackSetRolePolicy",
    },
];

/// Trust policy letting `service` assume the role.
pub fn trust_policy(service: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

pub struct RoleStage;

#[async_trait]
impl Stage for RoleStage {
    fn name(&self) -> &'static str {
        "roles"
    }

    async fn apply(&self, env: &StageEnv) -> anyhow::Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let tags = &env.config.tags;

        for role in &LANDING_ZONE_ROLES {
            let policy = trust_policy(role.service);
            let created = env
                .call(&format!("create_role({})", role.name), || {
                    env.provider.create_role(role.name, SERVICE_ROLE_PATH, &policy, tags)
                })
                .await
                .with_context(|| format!("creating role {}", role.name))?;

            env.call(&format!("attach_role_policy({})", role.name), || {
                env.provider.attach_role_policy(&created.arn, role.policy_arn)
            })
            .await
            .with_context(|| format!("attaching {} to role {}", role.policy_arn, role.name))?;

            info!(role = role.name, arn = %created.arn, "service role ready");
            report.record(created.arn);
        }

        Ok(report)
    }
}
