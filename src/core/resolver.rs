//! Template resolution and dependency ordering.
//!
//! Resolves `{{params.key}}` templates in declared values. Orders stacks and
//! resources with Kahn's algorithm using deterministic (alphabetical)
//! tie-breaking. Edges come from explicit dependencies and from attribute
//! tokens embedded in resource properties.

use super::construct::tokens_in_value;
use super::tree::{ConstructTree, NodeId};
use super::types::json_value_to_string;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Resolve all template variables in a string.
pub fn resolve_template(template: &str, params: &IndexMap<String, Value>) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(param_key) = key.strip_prefix("params.") {
            params
                .get(param_key)
                .map(json_value_to_string)
                .ok_or_else(|| format!("unknown param: {}", param_key))?
        } else {
            return Err(format!("unknown template variable: {}", key));
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates in every string inside a JSON value.
pub fn resolve_value(value: &Value, params: &IndexMap<String, Value>) -> Result<Value, String> {
    Ok(match value {
        Value::String(s) => Value::String(resolve_template(s, params)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, params))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, params)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

/// Topologically order `ids`. Each edge `(before, after)` puts `before` first.
/// Kahn's algorithm with alphabetical tie-breaking for determinism.
pub fn topo_sort(ids: &[String], edges: &[(String, String)]) -> Result<Vec<String>, String> {
    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> =
        ids.iter().map(|id| (id.as_str(), Vec::new())).collect();

    let mut seen_edges: HashSet<(&str, &str)> = HashSet::new();
    for (before, after) in edges {
        if !in_degree.contains_key(before.as_str()) {
            return Err(format!("'{}' depends on unknown '{}'", after, before));
        }
        if !in_degree.contains_key(after.as_str()) {
            return Err(format!("unknown node '{}' in dependency edge", after));
        }
        if !seen_edges.insert((before.as_str(), after.as_str())) {
            continue;
        }
        if let Some(next) = adjacency.get_mut(before.as_str()) {
            next.push(after.as_str());
        }
        if let Some(d) = in_degree.get_mut(after.as_str()) {
            *d += 1;
        }
    }

    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order: Vec<String> = Vec::with_capacity(ids.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(neighbors) = adjacency.get(current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != in_degree.len() {
        let ordered: HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
        let mut cycle_members: Vec<&str> = in_degree
            .keys()
            .filter(|id| !ordered.contains(*id))
            .copied()
            .collect();
        cycle_members.sort_unstable();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

/// Resources `id` depends on: explicit edges plus token references.
pub fn resource_dependencies(tree: &ConstructTree, id: NodeId) -> Result<Vec<NodeId>, String> {
    let mut deps = tree.effective_dependencies(id);
    let node = tree.get(id)?;
    for value in node.properties.values() {
        for token in tokens_in_value(value)? {
            let target = tree.try_find_by_path(&token.path).ok_or_else(|| {
                format!(
                    "'{}' references '{}', which does not exist",
                    tree.path(id),
                    token.path
                )
            })?;
            let is_resource = tree.node(target).is_some_and(|n| n.kind().is_resource());
            if !is_resource {
                return Err(format!(
                    "'{}' references '{}', which is not a resource",
                    tree.path(id),
                    token.path
                ));
            }
            if target == id {
                return Err(format!(
                    "'{}' references itself through '{}'",
                    tree.path(id),
                    token.path
                ));
            }
            if !deps.contains(&target) {
                deps.push(target);
            }
        }
    }
    Ok(deps)
}

/// For each stack, the other stacks it must deploy after.
pub fn stack_dependencies(tree: &ConstructTree) -> Result<IndexMap<NodeId, Vec<NodeId>>, String> {
    let mut out: IndexMap<NodeId, Vec<NodeId>> = IndexMap::new();
    for stack in tree.stacks() {
        let mut deps: Vec<NodeId> = Vec::new();
        for explicit in tree.get(stack)?.dependencies() {
            if let Some(other) = tree.stack_of(*explicit) {
                if other != stack && !deps.contains(&other) {
                    deps.push(other);
                }
            }
        }
        for resource in tree.resources_under(stack) {
            for dep in resource_dependencies(tree, resource)? {
                if let Some(other) = tree.stack_of(dep) {
                    if other != stack && !deps.contains(&other) {
                        deps.push(other);
                    }
                }
            }
        }
        out.insert(stack, deps);
    }
    Ok(out)
}

/// Stacks in the order they must be deployed.
pub fn deployment_order(tree: &ConstructTree) -> Result<Vec<NodeId>, String> {
    let deps = stack_dependencies(tree)?;
    let stacks: Vec<NodeId> = deps.keys().copied().collect();
    let edges: Vec<(NodeId, NodeId)> = deps
        .iter()
        .flat_map(|(stack, before)| before.iter().map(move |b| (*b, *stack)))
        .collect();
    order_nodes(tree, &stacks, &edges)
}

/// Resources of one stack in creation order. Cross-stack edges are left to
/// [`deployment_order`].
pub fn resource_order(tree: &ConstructTree, stack: NodeId) -> Result<Vec<NodeId>, String> {
    let resources = tree.resources_under(stack);
    let mut edges = Vec::new();
    for &r in &resources {
        for dep in resource_dependencies(tree, r)? {
            if tree.stack_of(dep) == Some(stack) {
                edges.push((dep, r));
            }
        }
    }
    order_nodes(tree, &resources, &edges)
}

/// Topologically order nodes by path.
fn order_nodes(
    tree: &ConstructTree,
    nodes: &[NodeId],
    edges: &[(NodeId, NodeId)],
) -> Result<Vec<NodeId>, String> {
    let by_path: HashMap<String, NodeId> = nodes.iter().map(|n| (tree.path(*n), *n)).collect();
    let ids: Vec<String> = nodes.iter().map(|n| tree.path(*n)).collect();
    let path_edges: Vec<(String, String)> = edges
        .iter()
        .map(|(a, b)| (tree.path(*a), tree.path(*b)))
        .collect();
    let sorted = topo_sort(&ids, &path_edges)?;
    Ok(sorted.iter().filter_map(|p| by_path.get(p).copied()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::function::{Function, FunctionProps};
    use crate::constructs::stack::{Stack, StackProps};
    use crate::constructs::table::{Table, TableProps};
    use crate::core::construct::Construct;
    use crate::core::tree::ConstructKind;

    fn params(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn edge(a: &str, b: &str) -> (String, String) {
        (a.to_string(), b.to_string())
    }

    #[test]
    fn test_resolve_params() {
        let p = params(&[("name", Value::String("world".to_string()))]);
        assert_eq!(resolve_template("hello {{params.name}}", &p).unwrap(), "hello world");
    }

    #[test]
    fn test_resolve_multiple_and_numbers() {
        let p = params(&[("a", Value::String("X".into())), ("n", serde_json::json!(3))]);
        assert_eq!(resolve_template("{{params.a}}-{{ params.n }}", &p).unwrap(), "X-3");
    }

    #[test]
    fn test_resolve_unknown_param() {
        let err = resolve_template("{{params.missing}}", &IndexMap::new()).unwrap_err();
        assert!(err.contains("unknown param"));
    }

    #[test]
    fn test_resolve_unknown_variable_and_unclosed() {
        assert!(resolve_template("{{machine.x}}", &IndexMap::new())
            .unwrap_err()
            .contains("unknown template variable"));
        assert!(resolve_template("{{params.x", &IndexMap::new())
            .unwrap_err()
            .contains("unclosed"));
    }

    #[test]
    fn test_resolve_value_nested() {
        let p = params(&[("env", Value::String("prod".into()))]);
        let v = serde_json::json!({"Name": "svc-{{params.env}}", "List": ["{{params.env}}", 1]});
        let r = resolve_value(&v, &p).unwrap();
        assert_eq!(r["Name"], "svc-prod");
        assert_eq!(r["List"][0], "prod");
        assert_eq!(r["List"][1], 1);
    }

    #[test]
    fn test_topo_linear() {
        let order = topo_sort(&strs(&["c", "b", "a"]), &[edge("a", "b"), edge("b", "c")]).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topo_alphabetical_ties() {
        let order = topo_sort(&strs(&["beta", "alpha"]), &[]).unwrap();
        assert_eq!(order, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_topo_diamond() {
        let order = topo_sort(
            &strs(&["bottom", "right", "left", "top"]),
            &[
                edge("top", "left"),
                edge("top", "right"),
                edge("left", "bottom"),
                edge("right", "bottom"),
            ],
        )
        .unwrap();
        assert_eq!(order, vec!["top", "left", "right", "bottom"]);
    }

    #[test]
    fn test_topo_duplicate_edges_ignored() {
        let order = topo_sort(&strs(&["a", "b"]), &[edge("a", "b"), edge("a", "b")]).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_topo_cycle() {
        let err = topo_sort(&strs(&["a", "b", "c"]), &[edge("a", "b"), edge("b", "a")]).unwrap_err();
        assert!(err.ends_with("involving: a, b"), "{err}");
    }

    #[test]
    fn test_topo_unknown() {
        assert!(topo_sort(&strs(&["a"]), &[edge("ghost", "a")]).is_err());
    }

    fn two_stacks() -> (ConstructTree, Stack, Stack, Table, Function) {
        let mut tree = ConstructTree::new("app");
        let root = tree.root();
        let api = Stack::new(&mut tree, &root, "Api", StackProps::default()).unwrap();
        let data = Stack::new(&mut tree, &root, "Data", StackProps::default()).unwrap();
        let table = Table::new(
            &mut tree,
            &data,
            "Orders",
            TableProps {
                partition_key: "id".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let f = Function::new(
            &mut tree,
            &api,
            "Handler",
            FunctionProps {
                handler: "main".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        (tree, api, data, table, f)
    }

    #[test]
    fn test_deployment_order_follows_tokens() {
        let (mut tree, api, data, table, f) = two_stacks();
        // Without references: alphabetical
        assert_eq!(deployment_order(&tree).unwrap(), vec![api.node_id(), data.node_id()]);
        let name = table.table_name(&tree);
        f.add_environment(&mut tree, "TABLE", &name).unwrap();
        assert_eq!(deployment_order(&tree).unwrap(), vec![data.node_id(), api.node_id()]);
        let deps = stack_dependencies(&tree).unwrap();
        assert_eq!(deps[&api.node_id()], vec![data.node_id()]);
        assert!(deps[&data.node_id()].is_empty());
    }

    #[test]
    fn test_deployment_order_cycle() {
        let (mut tree, _, _, table, f) = two_stacks();
        let name = table.table_name(&tree);
        f.add_environment(&mut tree, "TABLE", &name).unwrap();
        let back = f.function_arn(&tree);
        tree.set_property(table.node_id(), "StreamTarget", Value::String(back)).unwrap();
        let err = deployment_order(&tree).unwrap_err();
        assert!(err.contains("cycle"), "{err}");
    }

    #[test]
    fn test_resource_order_within_stack() {
        let (tree, api, _, _, f) = two_stacks();
        let order = resource_order(&tree, api.node_id()).unwrap();
        // The role comes first; the function depends on it
        assert_eq!(order, vec![f.role(), f.node_id()]);
    }

    #[test]
    fn test_resource_dependencies_dangling_token() {
        let (mut tree, _, _, table, _) = two_stacks();
        tree.set_property(
            table.node_id(),
            "X",
            Value::String(crate::core::construct::token("Nowhere/Thing", "Arn")),
        )
        .unwrap();
        let err = resource_dependencies(&tree, table.node_id()).unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn test_resource_dependencies_non_resource_token() {
        let (mut tree, api, _, table, _) = two_stacks();
        let group = tree.add_child(api.node_id(), "G", ConstructKind::Group).unwrap();
        let t = crate::core::construct::token(&tree.path(group), "Ref");
        tree.set_property(table.node_id(), "X", Value::String(t)).unwrap();
        let err = resource_dependencies(&tree, table.node_id()).unwrap_err();
        assert!(err.contains("not a resource"));
    }

    #[test]
    fn test_resource_dependencies_self_token() {
        let (mut tree, _, _, table, _) = two_stacks();
        let t = crate::core::construct::token(&tree.path(table.node_id()), "Arn");
        tree.set_property(table.node_id(), "X", Value::String(t)).unwrap();
        let err = resource_dependencies(&tree, table.node_id()).unwrap_err();
        assert!(err.contains("references itself"), "{err}");
    }
}
