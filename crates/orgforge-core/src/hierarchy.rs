//! OU hierarchy construction.
//!
//! Builds an [`OuSpec`] tree depth-first in pre-order with an explicit stack:
//! a parent is always created before its children, and siblings are created
//! in declared order. Each creation goes through the [`CallGuard`], and each
//! created OU publishes `/organization/ou/<name>`.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::domain::{OrgError, OuNode, OuRegistry, OuSpec, OuTree, Result, ValidationError};
use crate::provider::CloudProvider;
use crate::resilience::CallGuard;

pub const OU_PARAMETER_PREFIX: &str = "/organization/ou";

/// Parameter path of the side record for OU `name`.
pub fn ou_parameter_path(name: &str) -> String {
    format!("{OU_PARAMETER_PREFIX}/{name}")
}

pub struct HierarchyBuilder {
    provider: Arc<dyn CloudProvider>,
    guard: CallGuard,
}

impl HierarchyBuilder {
    pub fn new(provider: Arc<dyn CloudProvider>, guard: CallGuard) -> Self {
        Self { provider, guard }
    }

    /// Create the whole `spec` tree under `root_parent_id`.
    ///
    /// Returns the top node and a registry of every created node. On failure
    /// nothing is rolled back; use [`HierarchyBuilder::build_into`] to keep
    /// track of what was created.
    pub async fn build(&self, root_parent_id: &str, spec: &OuSpec) -> Result<(OuNode, OuRegistry)> {
        let mut tree = OuTree::new();
        let top = self.build_into(root_parent_id, spec, &mut tree).await?;
        let registry = tree.to_registry()?;
        Ok((top, registry))
    }

    /// Create `spec` under `root_parent_id`, appending every created node to
    /// `tree` as soon as it exists. Returns the top node.
    ///
    /// Names must be unique within `spec` and must not already be in `tree`;
    /// both are checked before the first provider call.
    #[instrument(skip(self, spec, tree), fields(ou = %spec.name, run_id = %self.guard.context().run_id()))]
    pub async fn build_into(
        &self,
        root_parent_id: &str,
        spec: &OuSpec,
        tree: &mut OuTree,
    ) -> Result<OuNode> {
        spec.validate()?;
        if let Some(name) = spec.names().into_iter().find(|n| tree.index_of(n).is_some()) {
            return Err(ValidationError::DuplicateOuName {
                name: name.to_string(),
            }
            .into());
        }

        let before = tree.len();
        let (top_index, top) = self.create_and_record(spec, root_parent_id, None, tree).await?;

        // (spec, parent index, parent id); children pushed in reverse so they
        // pop in declared order.
        let mut pending: Vec<(&OuSpec, usize, String)> = Vec::new();
        push_children(&mut pending, spec, top_index, &top.id);

        while let Some((node_spec, parent, parent_id)) = pending.pop() {
            let (index, node) = self
                .create_and_record(node_spec, &parent_id, Some(parent), tree)
                .await?;
            push_children(&mut pending, node_spec, index, &node.id);
        }

        info!(
            ou = %spec.name,
            created = tree.len() - before,
            "organizational unit tree built"
        );
        Ok(top)
    }

    async fn create_and_record(
        &self,
        spec: &OuSpec,
        parent_id: &str,
        parent: Option<usize>,
        tree: &mut OuTree,
    ) -> Result<(usize, OuNode)> {
        let node = self.create_ou(spec, parent_id).await?;
        let index = tree.push(node.clone(), parent);
        self.publish(&node, spec).await?;
        Ok((index, node))
    }

    async fn create_ou(&self, spec: &OuSpec, parent_id: &str) -> Result<OuNode> {
        let provider = &self.provider;
        let created = self
            .guard
            .call(&format!("create_organizational_unit({})", spec.name), || {
                provider.create_organizational_unit(&spec.name, parent_id, &spec.tags)
            })
            .await?;

        self.guard.context().metrics().inc_ous_created();
        info!(
            ou = %spec.name,
            id = %created.id,
            parent_id = %parent_id,
            "created organizational unit"
        );
        Ok(OuNode {
            id: created.id,
            arn: created.arn,
            name: spec.name.clone(),
            parent_id: parent_id.to_string(),
        })
    }

    async fn publish(&self, node: &OuNode, spec: &OuSpec) -> Result<()> {
        let path = ou_parameter_path(&node.name);
        let value = serde_json::to_string(node).map_err(OrgError::from)?;
        let provider = &self.provider;
        self.guard
            .call(&format!("put_parameter({path})"), || {
                provider.put_parameter(&path, &value, false, &spec.tags)
            })
            .await
    }
}

fn push_children<'a>(
    pending: &mut Vec<(&'a OuSpec, usize, String)>,
    spec: &'a OuSpec,
    index: usize,
    id: &str,
) {
    for child in spec.children.iter().rev() {
        pending.push((child, index, id.to_string()));
    }
}
