//! Raw resource construct: any resource type with literal properties.

use super::new_resource;
use crate::core::construct::{token_for, Construct, REF};
use crate::core::tree::{ConstructError, ConstructTree, NodeId};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfnResource {
    node: NodeId,
}

impl CfnResource {
    pub fn new(
        tree: &mut ConstructTree,
        scope: &dyn Construct,
        id: &str,
        resource_type: &str,
        properties: Map<String, Value>,
    ) -> Result<Self, ConstructError> {
        if !is_resource_type(resource_type) {
            return Err(ConstructError::InvalidScope {
                path: super::join_path(&scope.path(tree), id),
                reason: format!(
                    "resource type '{}' must look like Provider::Service::Type",
                    resource_type
                ),
            });
        }
        let node = new_resource(tree, scope, id, resource_type, properties)?;
        Ok(Self { node })
    }

    /// Token for the resource's primary reference.
    pub fn reference(&self, tree: &ConstructTree) -> String {
        token_for(tree, self, REF)
    }

    /// Token for an arbitrary attribute.
    pub fn attribute(&self, tree: &ConstructTree, attr: &str) -> String {
        token_for(tree, self, attr)
    }
}

impl Construct for CfnResource {
    fn node_id(&self) -> NodeId {
        self.node
    }
}

fn is_resource_type(s: &str) -> bool {
    let parts: Vec<&str> = s.split("::").collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric()))
}
