//! Provisioned OU topology.
//!
//! Created OUs are recorded in an [`OuTree`] arena in creation order, each
//! entry holding the index of its parent. The name-keyed [`OuRegistry`] is a
//! projection of the arena and refuses to overwrite an existing name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// An organizational unit as created by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OuNode {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TreeEntry {
    node: OuNode,
    /// `None` when the parent is outside the arena (the organization root).
    parent: Option<usize>,
}

/// Arena of created OUs in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OuTree {
    entries: Vec<TreeEntry>,
}

impl OuTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its index.
    ///
    /// `parent` must already be in the arena, so indices always point
    /// backwards and the arena is a valid pre-order prefix at every step.
    pub fn push(&mut self, node: OuNode, parent: Option<usize>) -> usize {
        debug_assert!(parent.map_or(true, |p| p < self.entries.len()));
        self.entries.push(TreeEntry { node, parent });
        self.entries.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&OuNode> {
        self.entries.get(index).map(|e| &e.node)
    }

    pub fn parent_of(&self, index: usize) -> Option<usize> {
        self.entries.get(index).and_then(|e| e.parent)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> impl DoubleEndedIterator<Item = &OuNode> + '_ {
        self.entries.iter().map(|e| &e.node)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.node.name == name)
    }

    /// Direct children of `index`, in creation order.
    pub fn children_of(&self, index: usize) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.parent == Some(index))
            .map(|(i, _)| i)
            .collect()
    }

    /// Project the arena to a name-keyed registry.
    pub fn to_registry(&self) -> Result<OuRegistry, ValidationError> {
        let mut registry = OuRegistry::new();
        for node in self.nodes() {
            registry.insert(node.clone())?;
        }
        Ok(registry)
    }
}

/// Flat mapping from OU name to created node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OuRegistry {
    entries: BTreeMap<String, OuNode>,
}

impl OuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Fails instead of overwriting an existing name.
    pub fn insert(&mut self, node: OuNode) -> Result<(), ValidationError> {
        if self.entries.contains_key(&node.name) {
            return Err(ValidationError::DuplicateOuName { name: node.name });
        }
        self.entries.insert(node.name.clone(), node);
        Ok(())
    }

    /// Merge `other` into `self`. Nothing is inserted if any name collides.
    pub fn merge(&mut self, other: OuRegistry) -> Result<(), ValidationError> {
        if let Some(name) = other.entries.keys().find(|k| self.entries.contains_key(*k)) {
            return Err(ValidationError::DuplicateOuName { name: name.clone() });
        }
        self.entries.extend(other.entries);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&OuNode> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OuNode)> {
        self.entries.iter()
    }

    /// Name to id, sorted by name.
    pub fn ids(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(name, node)| (name.clone(), node.id.clone()))
            .collect()
    }
}

impl IntoIterator for OuRegistry {
    type Item = (String, OuNode);
    type IntoIter = std::collections::btree_map::IntoIter<String, OuNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
