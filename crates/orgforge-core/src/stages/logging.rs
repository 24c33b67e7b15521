//! Organization audit trail.

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use super::{Stage, StageEnv, StageReport};
use crate::config::LandingZoneConfig;
use crate::provider::LogTrailRequest;

pub const TRAIL_NAME: &str = "aws-controltower-trail";

pub fn log_group_arn(config: &LandingZoneConfig) -> String {
    format!(
        "arn:aws:logs:{}:{}:log-group:{}",
        config.home_region, config.management_account_id, config.cloud_trail_log_group
    )
}

pub fn trail_request(config: &LandingZoneConfig) -> LogTrailRequest {
    LogTrailRequest {
        name: TRAIL_NAME.to_string(),
        bucket: config.log_bucket_name.clone(),
        log_group_arn: log_group_arn(config),
        kms_key_arn: config.kms_key_arn.clone(),
        tags: config.tags.clone(),
    }
}

pub struct LoggingStage;

#[async_trait]
impl Stage for LoggingStage {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn apply(&self, env: &StageEnv) -> anyhow::Result<StageReport> {
        if !env.config.enable_cloud_trail {
            info!("cloud trail disabled, skipping");
            return Ok(StageReport::skipped(self.name()));
        }

        let request = trail_request(&env.config);
        let trail = env
            .call(&format!("create_log_trail({TRAIL_NAME})"), || {
                env.provider.create_log_trail(&request)
            })
            .await
            .with_context(|| format!("creating trail into bucket {}", request.bucket))?;

        info!(
            trail = %trail.arn,
            bucket = %request.bucket,
            retention_days = env.config.log_retention_days,
            "audit trail ready"
        );
        let mut report = StageReport::new(self.name());
        report.record(trail.arn);
        Ok(report)
    }
}
