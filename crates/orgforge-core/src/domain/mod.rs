//! Domain models for orgforge.
//!
//! - `OuSpec`: declarative OU tree (input)
//! - `OuNode`, `OuTree`, `OuRegistry`: created OUs (output)
//! - `AccountRecord`: member accounts
//! - `StateSnapshot`, `BackupRecord`: persisted topology

pub mod account;
pub mod error;
pub mod ou;
pub mod snapshot;
pub mod topology;

pub use account::{AccountRecord, AccountSpec, AccountStatus};
pub use error::{
    AggregateStageError, Cancelled, OrgError, PersistenceError, Phase, ProviderError, Result,
    StageFailure, ValidationError,
};
pub use ou::{validate_unique_names, OuSpec};
pub use snapshot::{backup_id, BackupRecord, CleanupReport, StateSnapshot};
pub use topology::{OuNode, OuRegistry, OuTree};
