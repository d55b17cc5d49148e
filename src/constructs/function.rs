//! Lambda function construct with its execution role.

use super::new_resource;
use super::table::Table;
use crate::core::construct::{token_for, Construct, REF};
use crate::core::tree::{ConstructError, ConstructTree, NodeId};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

pub const FUNCTION_TYPE: &str = "AWS::Lambda::Function";
pub const ROLE_TYPE: &str = "AWS::IAM::Role";

const DEFAULT_RUNTIME: &str = "provided.al2023";
const DEFAULT_MEMORY_MB: u32 = 128;
const DEFAULT_TIMEOUT_SECS: u32 = 3;

const TABLE_READ_WRITE_ACTIONS: [&str; 7] = [
    "dynamodb:BatchGetItem",
    "dynamodb:GetItem",
    "dynamodb:Query",
    "dynamodb:Scan",
    "dynamodb:PutItem",
    "dynamodb:UpdateItem",
    "dynamodb:DeleteItem",
];

/// Function configuration.
#[derive(Debug, Clone, Default)]
pub struct FunctionProps {
    pub handler: String,
    pub runtime: Option<String>,
    pub code: Option<String>,
    pub memory_mb: Option<u32>,
    pub timeout_secs: Option<u32>,
    pub environment: IndexMap<String, String>,
}

/// A function plus the `ServiceRole` it runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function {
    node: NodeId,
    role: NodeId,
}

impl Function {
    pub fn new(
        tree: &mut ConstructTree,
        scope: &dyn Construct,
        id: &str,
        props: FunctionProps,
    ) -> Result<Self, ConstructError> {
        let mut properties = Map::new();
        properties.insert("Handler".to_string(), props.handler.clone().into());
        properties.insert(
            "Runtime".to_string(),
            props.runtime.as_deref().unwrap_or(DEFAULT_RUNTIME).into(),
        );
        let code = props.code.unwrap_or_else(|| format!("{}.zip", id));
        properties.insert("Code".to_string(), json!({ "Asset": code }));
        properties.insert(
            "MemorySize".to_string(),
            props.memory_mb.unwrap_or(DEFAULT_MEMORY_MB).into(),
        );
        properties.insert(
            "Timeout".to_string(),
            props.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).into(),
        );
        let variables: Map<String, Value> = props
            .environment
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        properties.insert("Environment".to_string(), json!({ "Variables": variables }));

        let node = new_resource(tree, scope, id, FUNCTION_TYPE, properties)?;

        let mut role_props = Map::new();
        role_props.insert(
            "AssumeRolePolicyDocument".to_string(),
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": { "Service": "lambda.amazonaws.com" }
                }]
            }),
        );
        role_props.insert(
            "ManagedPolicyArns".to_string(),
            json!(["arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"]),
        );
        role_props.insert("Policies".to_string(), Value::Array(Vec::new()));
        let role = new_resource(tree, &node, "ServiceRole", ROLE_TYPE, role_props)?;

        let role_arn = token_for(tree, &role, "Arn");
        tree.set_property(node, "Role", role_arn.into())?;
        tree.add_dependency(node, role)?;

        Ok(Self { node, role })
    }

    /// The execution role created under this function.
    pub fn role(&self) -> NodeId {
        self.role
    }

    pub fn function_name(&self, tree: &ConstructTree) -> String {
        token_for(tree, self, REF)
    }

    pub fn function_arn(&self, tree: &ConstructTree) -> String {
        token_for(tree, self, "Arn")
    }

    /// Set an environment variable on the function.
    pub fn add_environment(
        &self,
        tree: &mut ConstructTree,
        key: &str,
        value: &str,
    ) -> Result<(), ConstructError> {
        let node = tree.get_mut(self.node)?;
        let env = node
            .properties
            .entry("Environment")
            .or_insert_with(|| json!({ "Variables": {} }));
        if let Some(vars) = env.get_mut("Variables").and_then(Value::as_object_mut) {
            vars.insert(key.to_string(), Value::String(value.to_string()));
        }
        Ok(())
    }

    /// Allow the function to read and write `table`.
    ///
    /// Adds an inline policy to the role, orders the function after the
    /// table, and exposes the table name as `<ID>_TABLE_NAME`.
    pub fn grant_read_write(&self, tree: &mut ConstructTree, table: &Table) -> Result<(), ConstructError> {
        let table_node = tree.get(table.node_id())?;
        let env_key = format!("{}_TABLE_NAME", env_name(table_node.id()));
        let policy_name = format!("{}ReadWrite", alnum(table_node.id()));
        let statement = json!({
            "PolicyName": policy_name,
            "PolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": TABLE_READ_WRITE_ACTIONS,
                    "Effect": "Allow",
                    "Resource": table.table_arn(tree)
                }]
            }
        });

        let role = tree.get_mut(self.role)?;
        let policies = role
            .properties
            .entry("Policies")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(list) = policies.as_array_mut() {
            if !list.contains(&statement) {
                list.push(statement);
            }
        }

        let table_name = table.table_name(tree);
        self.add_environment(tree, &env_key, &table_name)?;
        tree.add_dependency(self.node, table.node_id())
    }
}

impl Construct for Function {
    fn node_id(&self) -> NodeId {
        self.node
    }
}

fn alnum(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// `my-table.v2` → `MY_TABLE_V2`
fn env_name(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::stack::{Stack, StackProps};
    use crate::constructs::table::TableProps;

    fn setup() -> (ConstructTree, Stack) {
        let mut tree = ConstructTree::new("app");
        let root = tree.root();
        let s = Stack::new(&mut tree, &root, "Api", StackProps::default()).unwrap();
        (tree, s)
    }

    fn handler(name: &str) -> FunctionProps {
        FunctionProps {
            handler: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_function_creates_role_child() {
        let (mut tree, s) = setup();
        let f = Function::new(&mut tree, &s, "Handler", handler("index.main")).unwrap();
        assert_eq!(tree.children(f.node_id()), vec![f.role()]);
        assert_eq!(tree.path(f.role()), "Api/Handler/ServiceRole");
        let props = &tree.node(f.node_id()).unwrap().properties;
        assert_eq!(props["Handler"], "index.main");
        assert_eq!(props["Runtime"], DEFAULT_RUNTIME);
        assert_eq!(props["MemorySize"], 128);
        assert_eq!(props["Code"]["Asset"], "Handler.zip");
        assert_eq!(props["Role"], "${Token[Api/Handler/ServiceRole.Arn]}");
        assert_eq!(tree.node(f.node_id()).unwrap().dependencies(), &[f.role()]);
    }

    #[test]
    fn test_function_environment() {
        let (mut tree, s) = setup();
        let mut props = handler("main");
        props.environment.insert("MODE".to_string(), "fast".to_string());
        let f = Function::new(&mut tree, &s, "F", props).unwrap();
        f.add_environment(&mut tree, "LEVEL", "debug").unwrap();
        let vars = &tree.node(f.node_id()).unwrap().properties["Environment"]["Variables"];
        assert_eq!(vars["MODE"], "fast");
        assert_eq!(vars["LEVEL"], "debug");
    }

    #[test]
    fn test_function_grant_read_write() {
        let (mut tree, s) = setup();
        let table = Table::new(
            &mut tree,
            &s,
            "order-table",
            TableProps {
                partition_key: "id".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let f = Function::new(&mut tree, &s, "F", handler("main")).unwrap();
        f.grant_read_write(&mut tree, &table).unwrap();
        f.grant_read_write(&mut tree, &table).unwrap();

        let role = tree.node(f.role()).unwrap();
        let policies = role.properties["Policies"].as_array().unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0]["PolicyName"], "ordertableReadWrite");
        assert_eq!(
            policies[0]["PolicyDocument"]["Statement"][0]["Resource"],
            "${Token[Api/order-table.Arn]}"
        );

        let vars = &tree.node(f.node_id()).unwrap().properties["Environment"]["Variables"];
        assert_eq!(vars["ORDER_TABLE_TABLE_NAME"], "${Token[Api/order-table.Ref]}");
        assert!(tree.node(f.node_id()).unwrap().dependencies().contains(&table.node_id()));
    }

    #[test]
    fn test_function_duplicate_id() {
        let (mut tree, s) = setup();
        Function::new(&mut tree, &s, "F", handler("a")).unwrap();
        let err = Function::new(&mut tree, &s, "F", handler("b")).unwrap_err();
        assert!(matches!(err, ConstructError::DuplicateId { .. }));
    }

    #[test]
    fn test_function_env_name() {
        assert_eq!(env_name("my-table.v2"), "MY_TABLE_V2");
    }
}
