//! Typed constructs: tree nodes that also expose domain accessors.
//!
//! Each constructor:
//! 1. Creates exactly one node for the construct itself and keeps its handle
//! 2. Creates any sub-resources as children of that node
//! 3. Returns a value whose accessors hand out those children and tokens

pub mod api;
pub mod bucket;
pub mod function;
pub mod resource;
pub mod stack;
pub mod table;

use crate::core::construct::Construct;
use crate::core::tree::{ConstructError, ConstructKind, ConstructTree, NodeId};
use serde_json::{Map, Value};

/// Create a resource node under `scope`, which must be inside a stack.
pub(crate) fn new_resource(
    tree: &mut ConstructTree,
    scope: &dyn Construct,
    id: &str,
    resource_type: &str,
    properties: Map<String, Value>,
) -> Result<NodeId, ConstructError> {
    let parent = scope.node_id();
    tree.get(parent)?;
    if tree.stack_of(parent).is_none() {
        return Err(ConstructError::InvalidScope {
            path: join_path(&tree.path(parent), id),
            reason: format!("{} must be defined inside a stack", resource_type),
        });
    }
    let node = tree.add_child(
        parent,
        id,
        ConstructKind::Resource {
            resource_type: resource_type.to_string(),
        },
    )?;
    tree.get_mut(node)?.properties = properties;
    Ok(node)
}

pub(crate) fn join_path(scope: &str, id: &str) -> String {
    if scope.is_empty() {
        id.to_string()
    } else {
        format!("{}/{}", scope, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructs_resource_needs_stack() {
        let mut tree = ConstructTree::new("app");
        let root = tree.root();
        let err = new_resource(&mut tree, &root, "Loose", "AWS::S3::Bucket", Map::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'Loose': AWS::S3::Bucket must be defined inside a stack"
        );
    }

    #[test]
    fn test_constructs_resource_properties_stored() {
        let mut tree = ConstructTree::new("app");
        let stack = tree.add_child(tree.root(), "S", ConstructKind::Stack).unwrap();
        let mut props = Map::new();
        props.insert("TopicName".to_string(), Value::String("alerts".to_string()));
        let node = new_resource(&mut tree, &stack, "Topic", "AWS::SNS::Topic", props).unwrap();
        let n = tree.node(node).unwrap();
        assert_eq!(n.kind().resource_type(), Some("AWS::SNS::Topic"));
        assert_eq!(n.properties["TopicName"], "alerts");
    }

    #[test]
    fn test_constructs_join_path() {
        assert_eq!(join_path("", "A"), "A");
        assert_eq!(join_path("S", "A"), "S/A");
    }
}
