//! Shared VPC and its subnets.

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use super::{Stage, StageEnv, StageReport};

pub struct NetworkingStage;

#[async_trait]
impl Stage for NetworkingStage {
    fn name(&self) -> &'static str {
        "networking"
    }

    async fn apply(&self, env: &StageEnv) -> anyhow::Result<StageReport> {
        let Some(vpc) = env.config.vpc_settings.as_ref() else {
            info!("no vpc configured, skipping");
            return Ok(StageReport::skipped(self.name()));
        };

        let mut report = StageReport::new(self.name());
        let created = env
            .call(&format!("create_vpc({})", vpc.cidr), || {
                env.provider.create_vpc(&vpc.cidr, &env.config.tags)
            })
            .await
            .with_context(|| format!("creating vpc {}", vpc.cidr))?;
        info!(vpc_id = %created.id, cidr = %vpc.cidr, "vpc ready");
        report.record(created.id.clone());

        for subnet in &vpc.subnets {
            let mut tags = env.config.tags.clone();
            tags.extend(subnet.tags.clone());
            let made = env
                .call(&format!("create_subnet({})", subnet.name), || {
                    env.provider.create_subnet(
                        &created.id,
                        &subnet.name,
                        &subnet.cidr,
                        &subnet.availability_zone,
                        &tags,
                    )
                })
                .await
                .with_context(|| format!("creating subnet {} in {}", subnet.name, created.id))?;
            report.record(made.id);
        }

        Ok(report)
    }
}
