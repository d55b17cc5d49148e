//! Stages and stacks: the deployment groupings of a construct tree.

use crate::core::construct::Construct;
use crate::core::tree::{ConstructError, ConstructKind, ConstructTree, NodeId};
use crate::core::types::Environment;
use serde_json::json;

/// Stack-node property holding the deployment target.
const ENV_KEY: &str = "Environment";

/// A group of stacks deployed together (e.g. `Beta`, `Prod`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    node: NodeId,
}

impl Stage {
    /// Create a stage. Stages may nest in stages but not in stacks.
    pub fn new(tree: &mut ConstructTree, scope: &dyn Construct, id: &str) -> Result<Self, ConstructError> {
        reject_inside_stack(tree, scope.node_id(), id, "stage")?;
        let node = tree.add_child(scope.node_id(), id, ConstructKind::Stage)?;
        Ok(Self { node })
    }

    /// Stacks directly inside this stage, in declaration order.
    pub fn stacks(&self, tree: &ConstructTree) -> Vec<NodeId> {
        tree.children(self.node)
            .into_iter()
            .filter(|c| tree.node(*c).is_some_and(|n| *n.kind() == ConstructKind::Stack))
            .collect()
    }
}

impl Construct for Stage {
    fn node_id(&self) -> NodeId {
        self.node
    }
}

/// Stack configuration.
#[derive(Debug, Clone, Default)]
pub struct StackProps {
    pub description: Option<String>,
    pub env: Option<Environment>,
}

/// A deployable unit; synthesizes to one template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    node: NodeId,
}

impl Stack {
    /// Create a stack under the app or a stage. Stacks do not nest.
    pub fn new(
        tree: &mut ConstructTree,
        scope: &dyn Construct,
        id: &str,
        props: StackProps,
    ) -> Result<Self, ConstructError> {
        reject_inside_stack(tree, scope.node_id(), id, "stack")?;
        let node = tree.add_child(scope.node_id(), id, ConstructKind::Stack)?;
        let stack = tree.get_mut(node)?;
        stack.description = props.description;
        if let Some(env) = props.env {
            stack.properties.insert(
                ENV_KEY.to_string(),
                json!({ "account": env.account, "region": env.region }),
            );
        }
        Ok(Self { node })
    }

    pub fn env(&self, tree: &ConstructTree) -> Option<Environment> {
        stack_environment(tree, self.node)
    }

    /// Artifact id: path components joined by `-`.
    pub fn artifact_id(&self, tree: &ConstructTree) -> String {
        artifact_id(tree, self.node)
    }
}

impl Construct for Stack {
    fn node_id(&self) -> NodeId {
        self.node
    }
}

/// Deployment target recorded on the stack node, if any.
pub fn stack_environment(tree: &ConstructTree, node: NodeId) -> Option<Environment> {
    let value = tree.node(node)?.properties.get(ENV_KEY)?;
    serde_json::from_value(value.clone()).ok()
}

/// Artifact id for the stack at `node`.
pub fn artifact_id(tree: &ConstructTree, node: NodeId) -> String {
    tree.path_components(node).join("-")
}

fn reject_inside_stack(
    tree: &ConstructTree,
    parent: NodeId,
    id: &str,
    what: &str,
) -> Result<(), ConstructError> {
    tree.get(parent)?;
    if let Some(stack) = tree.stack_of(parent) {
        return Err(ConstructError::InvalidScope {
            path: super::join_path(&tree.path(parent), id),
            reason: format!("a {} cannot be defined inside stack '{}'", what, tree.path(stack)),
        });
    }
    Ok(())
}
