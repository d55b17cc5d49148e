//! S3 bucket construct.

use super::new_resource;
use crate::core::construct::{token_for, Construct, REF};
use crate::core::tree::{ConstructError, ConstructTree, NodeId};
use serde_json::{json, Map};

pub const BUCKET_TYPE: &str = "AWS::S3::Bucket";

#[derive(Debug, Clone, Default)]
pub struct BucketProps {
    pub versioned: bool,
    pub public_read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    node: NodeId,
}

impl Bucket {
    pub fn new(
        tree: &mut ConstructTree,
        scope: &dyn Construct,
        id: &str,
        props: BucketProps,
    ) -> Result<Self, ConstructError> {
        let mut properties = Map::new();
        if props.versioned {
            properties.insert(
                "VersioningConfiguration".to_string(),
                json!({"Status": "Enabled"}),
            );
        }
        // Public access stays blocked unless explicitly opened
        let block = !props.public_read;
        properties.insert(
            "PublicAccessBlockConfiguration".to_string(),
            json!({
                "BlockPublicAcls": block,
                "BlockPublicPolicy": block,
                "IgnorePublicAcls": block,
                "RestrictPublicBuckets": block
            }),
        );
        let node = new_resource(tree, scope, id, BUCKET_TYPE, properties)?;
        Ok(Self { node })
    }

    pub fn bucket_name(&self, tree: &ConstructTree) -> String {
        token_for(tree, self, REF)
    }

    pub fn bucket_arn(&self, tree: &ConstructTree) -> String {
        token_for(tree, self, "Arn")
    }
}

impl Construct for Bucket {
    fn node_id(&self) -> NodeId {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::stack::{Stack, StackProps};

    #[test]
    fn test_bucket_defaults_block_public_access() {
        let mut tree = ConstructTree::new("app");
        let root = tree.root();
        let s = Stack::new(&mut tree, &root, "S", StackProps::default()).unwrap();
        let b = Bucket::new(&mut tree, &s, "Assets", BucketProps::default()).unwrap();
        let props = &tree.node(b.node_id()).unwrap().properties;
        assert_eq!(props["PublicAccessBlockConfiguration"]["BlockPublicAcls"], true);
        assert!(props.get("VersioningConfiguration").is_none());
        assert_eq!(b.bucket_arn(&tree), "${Token[S/Assets.Arn]}");
    }

    #[test]
    fn test_bucket_versioned_public() {
        let mut tree = ConstructTree::new("app");
        let root = tree.root();
        let s = Stack::new(&mut tree, &root, "S", StackProps::default()).unwrap();
        let b = Bucket::new(
            &mut tree,
            &s,
            "Site",
            BucketProps {
                versioned: true,
                public_read: true,
            },
        )
        .unwrap();
        let props = &tree.node(b.node_id()).unwrap().properties;
        assert_eq!(props["VersioningConfiguration"]["Status"], "Enabled");
        assert_eq!(props["PublicAccessBlockConfiguration"]["RestrictPublicBuckets"], false);
        assert_eq!(b.bucket_name(&tree), "${Token[S/Site.Ref]}");
    }
}
