//! Member accounts.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

pub const MIN_ACCOUNT_NAME_LEN: usize = 3;
pub const MAX_ACCOUNT_NAME_LEN: usize = 50;

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

fn email_regex() -> Option<&'static Regex> {
    static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_RE.get_or_init(|| Regex::new(EMAIL_PATTERN).ok()).as_ref()
}

/// `true` if `email` has the `local@domain.tld` shape accounts require.
pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_some_and(|re| re.is_match(email))
}

/// `true` for a 12-digit account id.
pub fn is_valid_account_id(id: &str) -> bool {
    id.len() == 12 && id.bytes().all(|b| b.is_ascii_digit())
}

/// Account declared in configuration, before it has a parent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSpec {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl AccountSpec {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Suspended,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "ACTIVE"),
            AccountStatus::Suspended => write!(f, "SUSPENDED"),
        }
    }
}

/// A member account owned by one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub name: String,
    pub email: String,
    #[serde(rename = "parentOUId")]
    pub parent_ou_id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub status: AccountStatus,
    /// Provider-assigned id, set once created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
}

impl AccountRecord {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        parent_ou_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            parent_ou_id: parent_ou_id.into(),
            tags: BTreeMap::new(),
            status: AccountStatus::Active,
            id: None,
            arn: None,
        }
    }

    pub fn from_spec(spec: &AccountSpec, parent_ou_id: impl Into<String>) -> Self {
        let mut record = Self::new(spec.name.clone(), spec.email.clone(), parent_ou_id);
        record.tags = spec.tags.clone();
        record
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let len = self.name.chars().count();
        if !(MIN_ACCOUNT_NAME_LEN..=MAX_ACCOUNT_NAME_LEN).contains(&len) {
            return Err(ValidationError::AccountNameLength {
                name: self.name.clone(),
                len,
                min: MIN_ACCOUNT_NAME_LEN,
                max: MAX_ACCOUNT_NAME_LEN,
            });
        }
        if !is_valid_email(&self.email) {
            return Err(ValidationError::InvalidEmail {
                email: self.email.clone(),
            });
        }
        if self.parent_ou_id.trim().is_empty() {
            return Err(ValidationError::MissingParent {
                account: self.name.clone(),
            });
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn suspend(&mut self) {
        self.status = AccountStatus::Suspended;
    }

    pub fn resume(&mut self) {
        self.status = AccountStatus::Active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shapes() {
        assert!(is_valid_email("aft-management@example.com"));
        assert!(is_valid_email("first.last+tag@corp.example.io"));
        assert!(!is_valid_email("no-at-sign.example.com"));
        assert!(!is_valid_email("user@nodot"));
        assert!(!is_valid_email("user@example.c"));
    }

    #[test]
    fn test_account_id_shape() {
        assert!(is_valid_account_id("123456789012"));
        assert!(!is_valid_account_id("12345678901"));
        assert!(!is_valid_account_id("12345678901a"));
    }

    #[test]
    fn test_validate_name_bounds() {
        let short = AccountRecord::new("ab", "a@example.com", "ou-1");
        assert!(matches!(
            short.validate().unwrap_err(),
            ValidationError::AccountNameLength { len: 2, .. }
        ));

        let long = AccountRecord::new("x".repeat(51), "a@example.com", "ou-1");
        assert!(long.validate().is_err());

        let exact = AccountRecord::new("x".repeat(50), "a@example.com", "ou-1");
        assert!(exact.validate().is_ok());
    }

    #[test]
    fn test_validate_parent_required() {
        let orphan = AccountRecord::new("AFT-Management", "aft@example.com", "");
        assert_eq!(
            orphan.validate().unwrap_err(),
            ValidationError::MissingParent {
                account: "AFT-Management".to_string()
            }
        );
    }

    #[test]
    fn test_suspend_and_resume() {
        let mut account = AccountRecord::new("Workload-1", "w1@example.com", "ou-3");
        assert!(account.is_active());
        account.suspend();
        assert_eq!(account.status, AccountStatus::Suspended);
        account.resume();
        assert!(account.is_active());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&AccountStatus::Suspended).unwrap();
        assert_eq!(json, "\"SUSPENDED\"");
    }
}
