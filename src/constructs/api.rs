//! REST API construct: one API, a method per route, and a deployment.

use super::function::Function;
use super::new_resource;
use crate::core::construct::{token_for, Construct, REF};
use crate::core::tree::{ConstructError, ConstructTree, NodeId};
use crate::core::types::RouteDecl;
use serde_json::{json, Map};

pub const REST_API_TYPE: &str = "AWS::ApiGateway::RestApi";
pub const METHOD_TYPE: &str = "AWS::ApiGateway::Method";
pub const DEPLOYMENT_TYPE: &str = "AWS::ApiGateway::Deployment";

pub const METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "ANY"];

/// API configuration.
#[derive(Debug, Clone, Default)]
pub struct RestApiProps {
    /// Display name; defaults to the construct path
    pub name: Option<String>,
    pub routes: Vec<RouteDecl>,
}

/// A single route and the method resource created for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    node: NodeId,
    pub method: String,
    pub path: String,
}

impl Construct for Route {
    fn node_id(&self) -> NodeId {
        self.node
    }
}

/// An HTTP API fronting a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestApi {
    node: NodeId,
    handler: NodeId,
    deployment: NodeId,
    routes: Vec<Route>,
}

impl RestApi {
    pub fn new(
        tree: &mut ConstructTree,
        scope: &dyn Construct,
        id: &str,
        handler: &Function,
        props: RestApiProps,
    ) -> Result<Self, ConstructError> {
        let display_name = match props.name {
            Some(n) => n,
            None => super::join_path(&scope.path(tree), id).replace('/', "-"),
        };
        let mut properties = Map::new();
        properties.insert("Name".to_string(), display_name.into());
        let node = new_resource(tree, scope, id, REST_API_TYPE, properties)?;
        tree.add_dependency(node, handler.node_id())?;

        let api_ref = token_for(tree, &node, REF);
        let root_resource = token_for(tree, &node, "RootResourceId");
        let integration_uri = handler.function_arn(tree);

        let mut routes = Vec::new();
        for route in &props.routes {
            let method = route.method.to_ascii_uppercase();
            if !METHODS.contains(&method.as_str()) {
                return Err(ConstructError::InvalidScope {
                    path: tree.path(node),
                    reason: format!("unsupported HTTP method '{}'", route.method),
                });
            }
            let mut method_props = Map::new();
            method_props.insert("HttpMethod".to_string(), method.clone().into());
            method_props.insert("RestApiId".to_string(), api_ref.clone().into());
            method_props.insert("ResourceId".to_string(), root_resource.clone().into());
            method_props.insert("ResourcePath".to_string(), route.path.clone().into());
            method_props.insert("AuthorizationType".to_string(), "NONE".into());
            method_props.insert(
                "Integration".to_string(),
                json!({
                    "Type": "AWS_PROXY",
                    "IntegrationHttpMethod": "POST",
                    "Uri": integration_uri
                }),
            );
            let route_id = route_id(&method, &route.path);
            let route_node = new_resource(tree, &node, &route_id, METHOD_TYPE, method_props)?;
            routes.push(Route {
                node: route_node,
                method,
                path: route.path.clone(),
            });
        }

        let mut deployment_props = Map::new();
        deployment_props.insert("RestApiId".to_string(), api_ref.into());
        deployment_props.insert("StageName".to_string(), "prod".into());
        let deployment = new_resource(tree, &node, "Deployment", DEPLOYMENT_TYPE, deployment_props)?;
        for route in &routes {
            tree.add_dependency(deployment, route.node)?;
        }

        Ok(Self {
            node,
            handler: handler.node_id(),
            deployment,
            routes,
        })
    }

    /// The function every route invokes.
    pub fn handler(&self) -> NodeId {
        self.handler
    }

    pub fn deployment(&self) -> NodeId {
        self.deployment
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn api_id(&self, tree: &ConstructTree) -> String {
        token_for(tree, self, REF)
    }

    pub fn root_resource_id(&self, tree: &ConstructTree) -> String {
        token_for(tree, self, "RootResourceId")
    }
}

impl Construct for RestApi {
    fn node_id(&self) -> NodeId {
        self.node
    }
}

/// `GET /orders/{id}` → `GET-orders-id`; the bare root is `GET-root`.
fn route_id(method: &str, path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .map(|s| s.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        format!("{}-root", method)
    } else {
        format!("{}-{}", method, segments.join("-"))
    }
}
