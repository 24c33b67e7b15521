//! Error taxonomy for orgforge.
//!
//! Validation failures are never retried. Provider failures are retried by
//! the resilience layer until the attempt budget runs out. Cancellation is
//! fatal. The orchestrator wraps whatever surfaces with the phase it came from.

use std::fmt;

use orgforge_state::StorageError;

use super::snapshot::CleanupReport;

/// Errors produced by configuration and input validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("at least one governed region is required")]
    EmptyRegions,

    #[error("log retention must be between {min} and {max} days, got {days}")]
    LogRetentionOutOfRange { days: u32, min: u32, max: u32 },

    #[error("invalid email address: {email}")]
    InvalidEmail { email: String },

    #[error("invalid account email domain: {domain}")]
    InvalidEmailDomain { domain: String },

    #[error("invalid {field} account id: {value}")]
    InvalidAccountId { field: String, value: String },

    #[error("invalid CIDR {value}: {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("account name {name:?} must be between {min} and {max} characters, got {len}")]
    AccountNameLength {
        name: String,
        len: usize,
        min: usize,
        max: usize,
    },

    #[error("account {account} has no parent organizational unit")]
    MissingParent { account: String },

    #[error("organizational unit name must not be empty")]
    EmptyOuName,

    #[error("duplicate organizational unit name: {name}")]
    DuplicateOuName { name: String },

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
}

/// The run was stopped before the call could be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Cancelled {
    #[error("run deadline exceeded")]
    DeadlineExceeded,

    #[error("run cancelled")]
    Requested,
}

/// Failures reported by a cloud provider call.
///
/// The retry layer does not look at the variant; every failure is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("resource not found: {0}")]
    NotFound(String),
}

/// One failed governance stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: String,
    pub message: String,
    /// The stage stopped because the run was cancelled or hit its deadline.
    pub cancelled: bool,
}

/// Every stage that failed in a single [`crate::stages::StageRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateStageError {
    pub failures: Vec<StageFailure>,
    /// Number of stages that ran, failed or not.
    pub total: usize,
}

impl AggregateStageError {
    /// Names of the failing stages in the order they were declared.
    pub fn stage_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.stage.as_str()).collect()
    }

    /// `true` when every failure was a cancellation rather than a stage error.
    pub fn all_cancelled(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(|f| f.cancelled)
    }
}

impl fmt::Display for AggregateStageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} stage(s) failed:",
            self.failures.len(),
            self.total
        )?;
        for failure in &self.failures {
            write!(f, " [{}: {}]", failure.stage, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateStageError {}

/// State store failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("state save failed after {attempts} attempt(s): {last}")]
    SaveExhausted { attempts: u32, last: StorageError },

    #[error("state load failed after {attempts} attempt(s): {last}")]
    LoadExhausted { attempts: u32, last: StorageError },

    #[error("no state snapshot found under partition {pk}")]
    NotFound { pk: String },

    #[error("backup {backup_id} could not be written: {source}")]
    BackupFailed {
        backup_id: String,
        #[source]
        source: StorageError,
    },

    #[error("backup not found: {backup_id}")]
    BackupNotFound { backup_id: String },

    #[error("state snapshot {key} already exists")]
    Conflict { key: String },

    #[error("stored snapshot {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cleanup incomplete: {}", .0.failures.join("; "))]
    Cleanup(CleanupReport),

    #[error("state store is closed")]
    Closed,

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Orchestration step a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Validation,
    Organization,
    Hierarchy,
    Accounts,
    Stages,
    Manifest,
    StateSave,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validation => "validation",
            Phase::Organization => "organization creation",
            Phase::Hierarchy => "hierarchy build",
            Phase::Accounts => "account provisioning",
            Phase::Stages => "stage execution",
            Phase::Manifest => "manifest publication",
            Phase::StateSave => "state save",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level orgforge error.
#[derive(Debug, thiserror::Error)]
pub enum OrgError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Provider {
        operation: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Stages(#[from] AggregateStageError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{phase} failed: {source}")]
    PhaseFailed {
        phase: Phase,
        #[source]
        source: Box<OrgError>,
    },
}

impl OrgError {
    /// Attach the orchestration phase to an error.
    pub fn in_phase(self, phase: Phase) -> Self {
        OrgError::PhaseFailed {
            phase,
            source: Box::new(self),
        }
    }

    /// The innermost error, with any phase wrappers removed.
    pub fn root(&self) -> &OrgError {
        match self {
            OrgError::PhaseFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), OrgError::Cancelled(_))
    }
}

/// Result type for orgforge operations.
pub type Result<T> = std::result::Result<T, OrgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::LogRetentionOutOfRange {
            days: 2,
            min: 7,
            max: 3653,
        };
        assert_eq!(
            err.to_string(),
            "log retention must be between 7 and 3653 days, got 2"
        );

        let err = ValidationError::DuplicateOuName {
            name: "Security".to_string(),
        };
        assert!(err.to_string().contains("Security"));
    }

    #[test]
    fn test_aggregate_stage_error_names_every_stage() {
        let err = AggregateStageError {
            failures: vec![
                StageFailure {
                    stage: "encryption".to_string(),
                    message: "key policy rejected".to_string(),
                    cancelled: false,
                },
                StageFailure {
                    stage: "logging".to_string(),
                    message: "bucket missing".to_string(),
                    cancelled: true,
                },
            ],
            total: 5,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 of 5 stage(s) failed"));
        assert!(msg.contains("encryption: key policy rejected"));
        assert!(msg.contains("logging: bucket missing"));
        assert_eq!(err.stage_names(), vec!["encryption", "logging"]);
        assert!(!err.all_cancelled());
    }

    #[test]
    fn test_phase_wrapping_keeps_root() {
        let err = OrgError::from(Cancelled::DeadlineExceeded).in_phase(Phase::Hierarchy);
        assert_eq!(err.to_string(), "hierarchy build failed: run deadline exceeded");
        assert!(err.is_cancelled());
        assert!(matches!(err.root(), OrgError::Cancelled(_)));
    }

    #[test]
    fn test_provider_error_display() {
        let err = OrgError::Provider {
            operation: "create_organizational_unit(Workloads)".to_string(),
            attempts: 3,
            source: ProviderError::Throttled("rate exceeded".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "create_organizational_unit(Workloads) failed after 3 attempt(s): request throttled: rate exceeded"
        );
    }

    #[test]
    fn test_persistence_error_display() {
        let err = PersistenceError::SaveExhausted {
            attempts: 3,
            last: StorageError::Backend("table offline".to_string()),
        };
        assert!(err.to_string().contains("after 3 attempt(s)"));

        let err = PersistenceError::Cleanup(CleanupReport {
            failures: vec!["backup store: offline".to_string()],
            ..Default::default()
        });
        assert_eq!(err.to_string(), "cleanup incomplete: backup store: offline");
    }
}
