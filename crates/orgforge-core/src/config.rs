//! Run configuration.
//!
//! Everything is plain serde data with defaults, so a JSON file only needs to
//! name the fields it changes. [`OrganizationConfig::validate`] runs before
//! any provider call is made.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::account::{is_valid_account_id, is_valid_email, AccountRecord, AccountSpec};
use crate::domain::{validate_unique_names, OuSpec, ValidationError};
use crate::resilience::RetryPolicy;

pub const CONFIG_VERSION: &str = "1.0.0";
pub const MIN_LOG_RETENTION_DAYS: u32 = 7;
pub const MAX_LOG_RETENTION_DAYS: u32 = 3653;
pub const SECURITY_OU_NAME: &str = "Security";

/// Top-level configuration for one provisioning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrganizationConfig {
    pub version: String,
    pub landing_zone: LandingZoneConfig,
    pub runtime: RuntimeConfig,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            landing_zone: LandingZoneConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl OrganizationConfig {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Validate the whole configuration. Stops at the first problem.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.landing_zone.validate()?;
        self.runtime.validate()
    }
}

/// Governance baseline and organization layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LandingZoneConfig {
    pub governed_regions: Vec<String>,
    pub home_region: String,
    pub default_ou_name: String,
    /// Additional top-level OU trees, created after Security and the default OU.
    pub organization_units: Vec<OuSpec>,
    pub log_bucket_name: String,
    pub log_retention_days: u32,
    pub tags: BTreeMap<String, String>,

    pub kms_key_alias: String,
    /// Existing key used to encrypt the trail, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_key_arn: Option<String>,

    pub account_email_domain: String,
    pub management_account_id: String,
    pub log_archive_account_id: String,
    pub audit_account_id: String,
    pub security_account_id: String,
    /// Create `AFT-Management` and `AFT-Networking` under the Security OU.
    pub create_default_accounts: bool,

    pub enabled_guardrails: Vec<String>,
    pub allowed_regions: Vec<String>,
    pub cloud_trail_log_group: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_settings: Option<VpcConfig>,

    #[serde(rename = "requireMFA")]
    pub require_mfa: bool,
    #[serde(rename = "enableSSLRequests")]
    pub enable_ssl_requests: bool,
    pub enable_security_hub: bool,
    pub enable_guard_duty: bool,
    pub enable_config: bool,
    pub enable_cloud_trail: bool,
    #[serde(rename = "allowedIPRanges")]
    pub allowed_ip_ranges: Vec<String>,
    pub restricted_services: Vec<String>,
}

impl Default for LandingZoneConfig {
    fn default() -> Self {
        Self {
            governed_regions: vec!["us-east-1".to_string(), "us-west-2".to_string()],
            home_region: "us-east-1".to_string(),
            default_ou_name: "Sandbox".to_string(),
            organization_units: Vec::new(),
            log_bucket_name: "orgforge-central-logs".to_string(),
            log_retention_days: 90,
            tags: BTreeMap::from([
                ("ManagedBy".to_string(), "orgforge".to_string()),
                ("Project".to_string(), "ControlTower".to_string()),
            ]),
            kms_key_alias: "controltower".to_string(),
            kms_key_arn: None,
            account_email_domain: "example.com".to_string(),
            management_account_id: "111111111111".to_string(),
            log_archive_account_id: "222222222222".to_string(),
            audit_account_id: "333333333333".to_string(),
            security_account_id: "444444444444".to_string(),
            create_default_accounts: true,
            enabled_guardrails: vec![
                "AWS-GR_RESTRICT_ROOT_USER".to_string(),
                "AWS-GR_ENCRYPTED_VOLUMES".to_string(),
            ],
            allowed_regions: Vec::new(),
            cloud_trail_log_group: "/aws/controltower/cloudtrail".to_string(),
            vpc_settings: Some(VpcConfig::default()),
            require_mfa: true,
            enable_ssl_requests: true,
            enable_security_hub: true,
            enable_guard_duty: true,
            enable_config: true,
            enable_cloud_trail: true,
            allowed_ip_ranges: Vec::new(),
            restricted_services: Vec::new(),
        }
    }
}

impl LandingZoneConfig {
    /// Accounts created under the Security OU when enabled.
    pub fn default_accounts(&self) -> Vec<AccountSpec> {
        if !self.create_default_accounts {
            return Vec::new();
        }
        ["AFT-Management", "AFT-Networking"]
            .into_iter()
            .map(|name| {
                let email = format!("{}@{}", name.to_ascii_lowercase(), self.account_email_domain);
                let mut spec = AccountSpec::new(name, email);
                spec.tags = self.tags.clone();
                spec
            })
            .collect()
    }

    /// Every top-level OU tree in creation order: Security, the default OU,
    /// then the declared trees.
    pub fn top_level_specs(&self) -> Vec<OuSpec> {
        let mut security = OuSpec::new(SECURITY_OU_NAME);
        security.accounts = self.default_accounts();

        let mut specs = vec![security, OuSpec::new(self.default_ou_name.clone())];
        specs.extend(self.organization_units.iter().cloned());
        for spec in &mut specs {
            for (k, v) in &self.tags {
                spec.tags.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        specs
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.governed_regions.is_empty() {
            return Err(ValidationError::EmptyRegions);
        }

        if !(MIN_LOG_RETENTION_DAYS..=MAX_LOG_RETENTION_DAYS).contains(&self.log_retention_days) {
            return Err(ValidationError::LogRetentionOutOfRange {
                days: self.log_retention_days,
                min: MIN_LOG_RETENTION_DAYS,
                max: MAX_LOG_RETENTION_DAYS,
            });
        }

        if !is_valid_email(&format!("probe@{}", self.account_email_domain)) {
            return Err(ValidationError::InvalidEmailDomain {
                domain: self.account_email_domain.clone(),
            });
        }

        for (field, id) in [
            ("Management", &self.management_account_id),
            ("LogArchive", &self.log_archive_account_id),
            ("Audit", &self.audit_account_id),
            ("Security", &self.security_account_id),
        ] {
            if !is_valid_account_id(id) {
                return Err(ValidationError::InvalidAccountId {
                    field: field.to_string(),
                    value: id.clone(),
                });
            }
        }

        if let Some(vpc) = &self.vpc_settings {
            vpc.validate()?;
        }
        for range in &self.allowed_ip_ranges {
            parse_cidr(range)?;
        }

        let specs = self.top_level_specs();
        validate_unique_names(&specs)?;
        for spec in &specs {
            for node in spec.walk() {
                for account in &node.accounts {
                    // Parent ids are assigned later; only the account's own fields matter here.
                    AccountRecord::from_spec(account, node.name.clone()).validate()?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VpcConfig {
    pub cidr: String,
    #[serde(rename = "enableTransitGw")]
    pub enable_transit_gw: bool,
    pub enable_vpc_flow_logs: bool,
    pub enable_dns_hostnames: bool,
    pub enable_dns_support: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetConfig>,
}

impl Default for VpcConfig {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            enable_transit_gw: true,
            enable_vpc_flow_logs: true,
            enable_dns_hostnames: true,
            enable_dns_support: true,
            subnets: Vec::new(),
        }
    }
}

impl VpcConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        parse_cidr(&self.cidr)?;
        for subnet in &self.subnets {
            parse_cidr(&subnet.cidr)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetConfig {
    pub name: String,
    pub cidr: String,
    pub availability_zone: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Parse `addr/prefix` notation.
pub fn parse_cidr(value: &str) -> Result<(IpAddr, u8), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidCidr {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let (addr, prefix) = value.split_once('/').ok_or_else(|| invalid("missing prefix length"))?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid("invalid address"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid("invalid prefix length"))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid("prefix length out of range"));
    }
    Ok((addr, prefix))
}

/// Timing, throttling and persistence knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Deadline for the whole run.
    pub run_timeout_secs: u64,
    pub rate_limit: RateLimitConfig,
    /// Applied to every provider call.
    pub retry: RetryPolicy,
    pub state: StateStoreConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: 30 * 60,
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            state: StateStoreConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.rate_limit.validate()?;
        self.retry.validate()?;
        self.state.retry.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst: 20,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(ValidationError::InvalidRateLimit(format!(
                "requests per second must be positive, got {}",
                self.requests_per_second
            )));
        }
        if self.burst == 0 {
            return Err(ValidationError::InvalidRateLimit(
                "burst must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateStoreConfig {
    pub table_name: String,
    pub backup_bucket: String,
    pub partition_key: String,
    pub backup_prefix: String,
    pub retry: RetryPolicy,
    pub state_expiry_days: u32,
    pub backup_retention_days: u32,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            table_name: "aws-organization-state".to_string(),
            backup_bucket: "aws-organization-state-backups".to_string(),
            partition_key: "state".to_string(),
            backup_prefix: "backup".to_string(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1_000,
                max_delay_ms: 30_000,
            },
            state_expiry_days: 30,
            backup_retention_days: 90,
        }
    }
}

impl StateStoreConfig {
    pub fn state_expiry(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.state_expiry_days))
    }

    pub fn backup_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.backup_retention_days))
    }
}
