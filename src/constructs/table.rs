//! DynamoDB table construct.

use super::new_resource;
use crate::core::construct::{token_for, Construct, REF};
use crate::core::tree::{ConstructError, ConstructTree, NodeId};
use crate::core::types::BillingMode;
use serde_json::{json, Map};

pub const TABLE_TYPE: &str = "AWS::DynamoDB::Table";

/// Table configuration.
#[derive(Debug, Clone, Default)]
pub struct TableProps {
    pub partition_key: String,
    pub sort_key: Option<String>,
    pub billing: BillingMode,
}

/// A key-value table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    node: NodeId,
    partition_key: String,
    sort_key: Option<String>,
}

impl Table {
    pub fn new(
        tree: &mut ConstructTree,
        scope: &dyn Construct,
        id: &str,
        props: TableProps,
    ) -> Result<Self, ConstructError> {
        let mut key_schema = vec![json!({"AttributeName": props.partition_key, "KeyType": "HASH"})];
        let mut attributes = vec![json!({"AttributeName": props.partition_key, "AttributeType": "S"})];
        if let Some(ref sk) = props.sort_key {
            key_schema.push(json!({"AttributeName": sk, "KeyType": "RANGE"}));
            attributes.push(json!({"AttributeName": sk, "AttributeType": "S"}));
        }

        let mut properties = Map::new();
        properties.insert("KeySchema".to_string(), key_schema.into());
        properties.insert("AttributeDefinitions".to_string(), attributes.into());
        properties.insert("BillingMode".to_string(), props.billing.to_string().into());
        if props.billing == BillingMode::Provisioned {
            properties.insert(
                "ProvisionedThroughput".to_string(),
                json!({"ReadCapacityUnits": 5, "WriteCapacityUnits": 5}),
            );
        }

        let node = new_resource(tree, scope, id, TABLE_TYPE, properties)?;
        Ok(Self {
            node,
            partition_key: props.partition_key,
            sort_key: props.sort_key,
        })
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn sort_key(&self) -> Option<&str> {
        self.sort_key.as_deref()
    }

    /// Token for the physical table name.
    pub fn table_name(&self, tree: &ConstructTree) -> String {
        token_for(tree, self, REF)
    }

    /// Token for the table ARN.
    pub fn table_arn(&self, tree: &ConstructTree) -> String {
        token_for(tree, self, "Arn")
    }
}

impl Construct for Table {
    fn node_id(&self) -> NodeId {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::stack::{Stack, StackProps};

    fn stack(tree: &mut ConstructTree) -> Stack {
        let root = tree.root();
        Stack::new(tree, &root, "Data", StackProps::default()).unwrap()
    }

    #[test]
    fn test_table_properties() {
        let mut tree = ConstructTree::new("app");
        let s = stack(&mut tree);
        let t = Table::new(
            &mut tree,
            &s,
            "Orders",
            TableProps {
                partition_key: "pk".to_string(),
                sort_key: Some("sk".to_string()),
                billing: BillingMode::PayPerRequest,
            },
        )
        .unwrap();
        let props = &tree.node(t.node_id()).unwrap().properties;
        assert_eq!(props["BillingMode"], "PAY_PER_REQUEST");
        assert_eq!(props["KeySchema"][0]["AttributeName"], "pk");
        assert_eq!(props["KeySchema"][1]["KeyType"], "RANGE");
        assert!(props.get("ProvisionedThroughput").is_none());
        assert_eq!(t.partition_key(), "pk");
        assert_eq!(t.sort_key(), Some("sk"));
    }

    #[test]
    fn test_table_provisioned() {
        let mut tree = ConstructTree::new("app");
        let s = stack(&mut tree);
        let t = Table::new(
            &mut tree,
            &s,
            "T",
            TableProps {
                partition_key: "id".to_string(),
                sort_key: None,
                billing: BillingMode::Provisioned,
            },
        )
        .unwrap();
        let props = &tree.node(t.node_id()).unwrap().properties;
        assert_eq!(props["ProvisionedThroughput"]["ReadCapacityUnits"], 5);
    }

    #[test]
    fn test_table_tokens_use_own_path() {
        let mut tree = ConstructTree::new("app");
        let s = stack(&mut tree);
        let t = Table::new(
            &mut tree,
            &s,
            "Orders",
            TableProps {
                partition_key: "id".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(t.table_name(&tree), "${Token[Data/Orders.Ref]}");
        assert_eq!(t.table_arn(&tree), "${Token[Data/Orders.Arn]}");
    }

    #[test]
    fn test_table_outside_stack_rejected() {
        let mut tree = ConstructTree::new("app");
        let root = tree.root();
        let err = Table::new(&mut tree, &root, "T", TableProps::default()).unwrap_err();
        assert!(matches!(err, ConstructError::InvalidScope { .. }));
    }
}
