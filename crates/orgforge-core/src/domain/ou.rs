//! Declarative organizational-unit specification.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::account::AccountSpec;
use super::error::ValidationError;

/// Input tree node: an OU to create, with its children in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OuSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Member accounts to create directly under this OU.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<AccountSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OuSpec>,
}

impl OuSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            tags: BTreeMap::new(),
            accounts: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: OuSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_account(mut self, account: AccountSpec) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Total number of OUs in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(OuSpec::node_count).sum::<usize>()
    }

    /// Pre-order walk over the subtree: parent before children, children in
    /// declared order.
    pub fn walk(&self) -> Vec<&OuSpec> {
        let mut out = Vec::with_capacity(self.node_count());
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// OU names in pre-order.
    pub fn names(&self) -> Vec<&str> {
        self.walk().into_iter().map(|n| n.name.as_str()).collect()
    }

    /// Reject empty names and names used more than once in the subtree.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_unique_names(std::slice::from_ref(self))
    }
}

/// Check that every OU name across `roots` is non-empty and globally unique.
pub fn validate_unique_names(roots: &[OuSpec]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for root in roots {
        for name in root.names() {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyOuName);
            }
            if !seen.insert(name) {
                return Err(ValidationError::DuplicateOuName {
                    name: name.to_string(),
                });
            }
        }
    }
    Ok(())
}
