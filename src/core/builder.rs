//! Composition: expand a validated app definition into a construct tree.
//!
//! Stacks are built in declaration order (top-level stacks first, then each
//! stage's stacks), constructs in declaration order within their scope.
//! `grants` and `depends_on` are wired in a second pass so they may point at
//! constructs declared later.

use super::construct::Construct;
use super::parser::{stacks_in_order, validate_app};
use super::resolver::{resolve_template, resolve_value};
use super::tree::{ConstructKind, ConstructTree, NodeId};
use super::types::{AppConfig, ConstructDecl, ConstructType};
use crate::constructs::api::{RestApi, RestApiProps};
use crate::constructs::bucket::{Bucket, BucketProps};
use crate::constructs::function::{Function, FunctionProps};
use crate::constructs::resource::CfnResource;
use crate::constructs::stack::{Stack, StackProps, Stage};
use crate::constructs::table::{Table, TableProps};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeMap;

/// A composed app: the tree plus typed handles keyed by construct path.
#[derive(Debug, Clone)]
pub struct BuiltApp {
    pub tree: ConstructTree,
    pub stacks: IndexMap<String, Stack>,
    pub tables: IndexMap<String, Table>,
    pub functions: IndexMap<String, Function>,
    pub apis: IndexMap<String, RestApi>,
    pub buckets: IndexMap<String, Bucket>,
    pub resources: IndexMap<String, CfnResource>,
}

/// Cross-references resolved after every construct exists.
struct Pending {
    path: String,
    node: NodeId,
    depends_on: Vec<String>,
    grants: Vec<String>,
}

struct Builder<'a> {
    params: &'a IndexMap<String, Value>,
    app: BuiltApp,
    pending: Vec<Pending>,
}

/// Validate `config` and compose its construct tree.
pub fn build_app(config: &AppConfig) -> Result<BuiltApp, String> {
    let errors = validate_app(config);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(format!(
            "validation failed ({} error(s)):\n  {}",
            errors.len(),
            messages.join("\n  ")
        ));
    }

    let mut builder = Builder {
        params: &config.params,
        app: BuiltApp {
            tree: ConstructTree::new(&config.name),
            stacks: IndexMap::new(),
            tables: IndexMap::new(),
            functions: IndexMap::new(),
            apis: IndexMap::new(),
            buckets: IndexMap::new(),
            resources: IndexMap::new(),
        },
        pending: Vec::new(),
    };

    let root = builder.app.tree.root();
    builder.tag(root, &config.tags)?;

    let mut stages: IndexMap<&str, Stage> = IndexMap::new();
    for (stage_id, stage) in &config.stages {
        let handle = Stage::new(&mut builder.app.tree, &root, stage_id)?;
        builder.tag(handle.node_id(), &stage.tags)?;
        stages.insert(stage_id.as_str(), handle);
    }

    for (path, stage, decl) in stacks_in_order(config) {
        let id = path.rsplit('/').next().unwrap_or(path.as_str());
        let scope: NodeId = match stage.and_then(|s| stages.get(s)) {
            Some(stage) => stage.node_id(),
            None => root,
        };
        let description = decl
            .description
            .as_deref()
            .map(|d| builder.resolve(d))
            .transpose()?;
        let stack = Stack::new(
            &mut builder.app.tree,
            &scope,
            id,
            StackProps {
                description,
                env: decl.env.clone(),
            },
        )?;
        builder.tag(stack.node_id(), &decl.tags)?;
        builder.app.stacks.insert(path.clone(), stack);
        for (cid, cdecl) in &decl.constructs {
            builder.build_construct(stack.node_id(), &path, cid, cdecl)?;
        }
    }

    builder.wire()?;
    Ok(builder.app)
}

impl Builder<'_> {
    fn resolve(&self, s: &str) -> Result<String, String> {
        resolve_template(s, self.params)
    }

    fn resolve_opt(&self, s: &Option<String>) -> Result<Option<String>, String> {
        s.as_deref().map(|v| self.resolve(v)).transpose()
    }

    fn tag(&mut self, node: NodeId, tags: &BTreeMap<String, String>) -> Result<(), String> {
        for (k, v) in tags {
            let value = self.resolve(v)?;
            self.app.tree.add_tag(node, k, &value)?;
        }
        Ok(())
    }

    fn build_construct(
        &mut self,
        scope: NodeId,
        scope_path: &str,
        id: &str,
        decl: &ConstructDecl,
    ) -> Result<(), String> {
        let path = format!("{}/{}", scope_path, id);
        let node = match decl.construct_type {
            ConstructType::Group => self.app.tree.add_child(scope, id, ConstructKind::Group)?,
            ConstructType::Table => {
                let props = TableProps {
                    partition_key: self.resolve(decl.partition_key.as_deref().unwrap_or_default())?,
                    sort_key: self.resolve_opt(&decl.sort_key)?,
                    billing: decl.billing.unwrap_or_default(),
                };
                let table = Table::new(&mut self.app.tree, &scope, id, props)?;
                let node = table.node_id();
                self.app.tables.insert(path.clone(), table);
                node
            }
            ConstructType::Function => {
                let mut environment = IndexMap::new();
                for (k, v) in &decl.environment {
                    environment.insert(k.clone(), self.resolve(v)?);
                }
                let props = FunctionProps {
                    handler: self.resolve(decl.handler.as_deref().unwrap_or_default())?,
                    runtime: self.resolve_opt(&decl.runtime)?,
                    code: self.resolve_opt(&decl.code)?,
                    memory_mb: decl.memory_mb,
                    timeout_secs: decl.timeout_secs,
                    environment,
                };
                let function = Function::new(&mut self.app.tree, &scope, id, props)?;
                let node = function.node_id();
                self.app.functions.insert(path.clone(), function);
                node
            }
            ConstructType::RestApi => {
                let target = decl.function.as_deref().unwrap_or_default();
                let handler = *self
                    .app
                    .functions
                    .get(target)
                    .ok_or_else(|| format!("'{}': unknown function '{}'", path, target))?;
                let props = RestApiProps {
                    name: None,
                    routes: decl.routes.clone(),
                };
                let api = RestApi::new(&mut self.app.tree, &scope, id, &handler, props)?;
                let node = api.node_id();
                self.app.apis.insert(path.clone(), api);
                node
            }
            ConstructType::Bucket => {
                let props = BucketProps {
                    versioned: decl.versioned.unwrap_or(false),
                    public_read: decl.public_read.unwrap_or(false),
                };
                let bucket = Bucket::new(&mut self.app.tree, &scope, id, props)?;
                let node = bucket.node_id();
                self.app.buckets.insert(path.clone(), bucket);
                node
            }
            ConstructType::Resource => {
                let resource_type = self.resolve(decl.resource_type.as_deref().unwrap_or_default())?;
                let mut properties = serde_json::Map::new();
                for (k, v) in &decl.properties {
                    properties.insert(k.clone(), resolve_value(v, self.params)?);
                }
                let resource =
                    CfnResource::new(&mut self.app.tree, &scope, id, &resource_type, properties)?;
                let node = resource.node_id();
                self.app.resources.insert(path.clone(), resource);
                node
            }
        };

        self.tag(node, &decl.tags)?;
        if !decl.depends_on.is_empty() || !decl.grants.is_empty() {
            self.pending.push(Pending {
                path: path.clone(),
                node,
                depends_on: decl.depends_on.clone(),
                grants: decl.grants.clone(),
            });
        }

        for (child_id, child) in &decl.children {
            self.build_construct(node, &path, child_id, child)?;
        }
        Ok(())
    }

    fn wire(&mut self) -> Result<(), String> {
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            for grant in &p.grants {
                let function = self
                    .app
                    .functions
                    .get(&p.path)
                    .copied()
                    .ok_or_else(|| format!("'{}' is not a function", p.path))?;
                let table = self
                    .app
                    .tables
                    .get(grant)
                    .cloned()
                    .ok_or_else(|| format!("'{}': unknown table '{}'", p.path, grant))?;
                function.grant_read_write(&mut self.app.tree, &table)?;
            }
            for dep in &p.depends_on {
                let target = self
                    .app
                    .tree
                    .try_find_by_path(dep)
                    .ok_or_else(|| format!("'{}' depends on unknown construct '{}'", p.path, dep))?;
                p.node.add_dependency(&mut self.app.tree, &target)?;
            }
        }
        Ok(())
    }
}
