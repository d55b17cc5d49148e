//! Synthesis: construct tree to cloud assembly.
//!
//! Every stack becomes one template. Resources are keyed by logical id in
//! tree pre-order. Attribute tokens in properties become `Ref`/`Fn::GetAtt`
//! intrinsics within a stack and export/import pairs across stacks.
//! Output is deterministic: the same tree renders byte-identical templates.

use super::construct::find_tokens;
use super::resolver::{deployment_order, resource_order, stack_dependencies};
use super::tree::{ConstructTree, NodeId};
use super::types::{
    CloudAssembly, ExportName, StackArtifact, StackTemplate, TemplateOutput, TemplateResource,
};
use crate::constructs::stack::{artifact_id, stack_environment};
use crate::provenance::hasher;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Assembly format version written to the manifest.
pub const ASSEMBLY_VERSION: &str = "1.0";

/// Metadata key carrying a resource's construct path.
pub const PATH_METADATA_KEY: &str = "strata:path";

/// Synthesize every stack of `tree`.
pub fn synthesize(tree: &ConstructTree) -> Result<CloudAssembly, String> {
    check_artifact_ids(tree)?;
    let order = deployment_order(tree)?;
    for &stack in &order {
        // DependsOn must not close a cycle inside a template
        resource_order(tree, stack)?;
    }
    let stack_deps = stack_dependencies(tree)?;
    let logical_ids = assign_logical_ids(tree)?;

    let mut ctx = TokenContext {
        tree,
        logical_ids: &logical_ids,
        stack: tree.root(),
        exports: Vec::new(),
    };

    let mut templates: IndexMap<NodeId, StackTemplate> = IndexMap::new();
    for &stack in &order {
        ctx.stack = stack;
        let template = build_template(&mut ctx, stack)?;
        templates.insert(stack, template);
    }

    // Producers deploy first, so their templates already exist
    for (stack, key, output) in std::mem::take(&mut ctx.exports) {
        let template = templates
            .get_mut(&stack)
            .ok_or_else(|| format!("export target '{}' is not a stack", tree.path(stack)))?;
        template.outputs.insert(key, output);
    }

    let mut artifacts = Vec::with_capacity(order.len());
    for (stack, template) in templates {
        let id = artifact_id(tree, stack);
        let rendered = render_template(&template)?;
        let dependencies = stack_deps
            .get(&stack)
            .map(|deps| {
                let mut ids: Vec<String> = deps.iter().map(|d| artifact_id(tree, *d)).collect();
                ids.sort();
                ids
            })
            .unwrap_or_default();
        artifacts.push(StackArtifact {
            template_file: format!("{}.template.json", id),
            id,
            path: tree.path(stack),
            stage: tree.stage_of(stack).map(|s| tree.path(s)),
            environment: stack_environment(tree, stack),
            dependencies,
            hash: hasher::hash_string(&rendered),
            template,
        });
    }

    let hashes: Vec<&str> = artifacts.iter().map(|a| a.hash.as_str()).collect();
    Ok(CloudAssembly {
        version: ASSEMBLY_VERSION.to_string(),
        app: tree.name().to_string(),
        hash: hasher::composite_hash(&hashes),
        artifacts,
    })
}

/// Canonical rendering of a template (pretty JSON, trailing newline).
pub fn render_template(template: &StackTemplate) -> Result<String, String> {
    let mut json =
        serde_json::to_string_pretty(template).map_err(|e| format!("serialize error: {}", e))?;
    json.push('\n');
    Ok(json)
}

/// Every stack must map to its own artifact id and template file.
fn check_artifact_ids(tree: &ConstructTree) -> Result<(), String> {
    let mut seen: HashMap<String, NodeId> = HashMap::new();
    for stack in tree.stacks() {
        let id = artifact_id(tree, stack);
        if let Some(other) = seen.get(&id) {
            return Err(format!(
                "artifact id '{}' is produced by both '{}' and '{}'",
                id,
                tree.path(*other),
                tree.path(stack)
            ));
        }
        seen.insert(id, stack);
    }
    Ok(())
}

/// Logical id of every resource, unique within its stack.
pub fn assign_logical_ids(tree: &ConstructTree) -> Result<HashMap<NodeId, String>, String> {
    let mut out = HashMap::new();
    for stack in tree.stacks() {
        let mut seen: HashMap<String, NodeId> = HashMap::new();
        for resource in tree.resources_under(stack) {
            let logical = tree.unique_id(resource)?;
            if let Some(other) = seen.get(&logical) {
                return Err(format!(
                    "logical id '{}' in stack '{}' is produced by both '{}' and '{}'",
                    logical,
                    tree.path(stack),
                    tree.path(*other),
                    tree.path(resource)
                ));
            }
            seen.insert(logical.clone(), resource);
            out.insert(resource, logical);
        }
    }
    Ok(out)
}

struct TokenContext<'a> {
    tree: &'a ConstructTree,
    logical_ids: &'a HashMap<NodeId, String>,
    /// Stack whose template is being built
    stack: NodeId,
    /// (producer stack, output key, output) for cross-stack references
    exports: Vec<(NodeId, String, TemplateOutput)>,
}

impl TokenContext<'_> {
    fn logical_id(&self, node: NodeId) -> Result<&str, String> {
        self.logical_ids
            .get(&node)
            .map(String::as_str)
            .ok_or_else(|| format!("'{}' is not a resource", self.tree.path(node)))
    }

    /// Intrinsic for `attr` of the resource at `path`.
    fn reference(&mut self, path: &str, attr: &str) -> Result<Value, String> {
        let target = self
            .tree
            .try_find_by_path(path)
            .ok_or_else(|| format!("token refers to unknown construct '{}'", path))?;
        let logical = self.logical_id(target)?.to_string();
        let local = if attr == super::construct::REF {
            json!({ "Ref": logical })
        } else {
            json!({ "Fn::GetAtt": [logical, attr] })
        };

        let producer = self
            .tree
            .stack_of(target)
            .ok_or_else(|| format!("'{}' has no enclosing stack", path))?;
        if producer == self.stack {
            return Ok(local);
        }

        let export_name = format!("{}:{}:{}", artifact_id(self.tree, producer), logical, attr);
        let key = format!("Export{}{}", logical, attr.replace(|c: char| !c.is_ascii_alphanumeric(), ""));
        let output = TemplateOutput {
            value: local,
            export: ExportName {
                name: export_name.clone(),
            },
        };
        if !self.exports.iter().any(|(s, k, _)| *s == producer && *k == key) {
            self.exports.push((producer, key, output));
        }
        Ok(json!({ "Fn::ImportValue": export_name }))
    }

    fn resolve_string(&mut self, s: &str) -> Result<Value, String> {
        let tokens = find_tokens(s)?;
        if tokens.is_empty() {
            return Ok(Value::String(s.to_string()));
        }
        if tokens.len() == 1 && tokens[0].span == (0..s.len()) {
            return self.reference(&tokens[0].path, &tokens[0].attr);
        }

        let mut parts = Vec::new();
        let mut cursor = 0;
        for token in &tokens {
            if token.span.start > cursor {
                parts.push(Value::String(s[cursor..token.span.start].to_string()));
            }
            parts.push(self.reference(&token.path, &token.attr)?);
            cursor = token.span.end;
        }
        if cursor < s.len() {
            parts.push(Value::String(s[cursor..].to_string()));
        }
        Ok(json!({ "Fn::Join": ["", parts] }))
    }

    fn resolve_value(&mut self, value: &Value) -> Result<Value, String> {
        Ok(match value {
            Value::String(s) => self.resolve_string(s)?,
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve_value(v)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }
}

fn build_template(ctx: &mut TokenContext<'_>, stack: NodeId) -> Result<StackTemplate, String> {
    let tree = ctx.tree;
    let mut template = StackTemplate {
        description: tree.get(stack)?.description.clone(),
        ..Default::default()
    };

    for resource in tree.resources_under(stack) {
        let node = tree.get(resource)?;
        let resource_type = node
            .kind()
            .resource_type()
            .ok_or_else(|| format!("'{}' is not a resource", tree.path(resource)))?
            .to_string();

        let mut properties = Map::new();
        for (k, v) in &node.properties {
            properties.insert(k.clone(), ctx.resolve_value(v)?);
        }
        let tags = tree.tags_of(resource);
        if !tags.is_empty() && !properties.contains_key("Tags") {
            let list: Vec<Value> = tags
                .iter()
                .map(|(k, v)| json!({ "Key": k, "Value": v }))
                .collect();
            properties.insert("Tags".to_string(), Value::Array(list));
        }

        let mut depends_on = Vec::new();
        for dep in tree.effective_dependencies(resource) {
            if tree.stack_of(dep) == Some(stack) {
                let logical = ctx.logical_id(dep)?.to_string();
                if !depends_on.contains(&logical) {
                    depends_on.push(logical);
                }
            }
        }

        let mut metadata = Map::new();
        metadata.insert(PATH_METADATA_KEY.to_string(), Value::String(tree.path(resource)));

        let logical = ctx.logical_id(resource)?.to_string();
        template.resources.insert(
            logical,
            TemplateResource {
                resource_type,
                properties,
                depends_on,
                metadata,
            },
        );
    }

    Ok(template)
}
