//! Construct tree arena.
//!
//! Every node lives in one arena owned by [`ConstructTree`]. A [`NodeId`] is
//! a copyable, non-owning handle; parents refer to children through an
//! order-preserving id map, children refer back to their parent by handle.
//! Nodes are only ever appended under an existing parent, so the tree is
//! acyclic by construction, and nothing is removed: a new composition pass
//! builds a new tree.

use crate::provenance::hasher;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum length of the human-readable part of a logical id.
const MAX_HUMAN_LEN: usize = 240;

/// Handle to a node in a [`ConstructTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena slot of this node.
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a node represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructKind {
    /// The root of the tree
    App,
    /// A group of stacks
    Stage,
    /// A deployable unit
    Stack,
    /// A plain scope with no deployable output of its own
    Group,
    /// A node that synthesizes to one template resource
    Resource { resource_type: String },
}

impl ConstructKind {
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }

    pub fn resource_type(&self) -> Option<&str> {
        match self {
            Self::Resource { resource_type } => Some(resource_type),
            _ => None,
        }
    }
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => write!(f, "app"),
            Self::Stage => write!(f, "stage"),
            Self::Stack => write!(f, "stack"),
            Self::Group => write!(f, "group"),
            Self::Resource { resource_type } => write!(f, "{}", resource_type),
        }
    }
}

/// Errors raised while composing a tree. All of them abort composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructError {
    /// A sibling with the same id already exists
    DuplicateId { scope: String, id: String },
    /// The id is empty or contains characters outside `[A-Za-z0-9_.-]`
    InvalidId { id: String, reason: String },
    /// The handle does not belong to this tree
    UnknownNode(NodeId),
    /// A node was asked to depend on itself
    SelfDependency { path: String },
    /// The construct cannot be placed under this scope
    InvalidScope { path: String, reason: String },
}

impl fmt::Display for ConstructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId { scope, id } => {
                let scope = if scope.is_empty() { "<app>" } else { scope };
                write!(f, "there is already a construct named '{}' in scope '{}'", id, scope)
            }
            Self::InvalidId { id, reason } => write!(f, "invalid construct id '{}': {}", id, reason),
            Self::UnknownNode(id) => write!(f, "node #{} does not belong to this tree", id.0),
            Self::SelfDependency { path } => write!(f, "construct '{}' depends on itself", path),
            Self::InvalidScope { path, reason } => write!(f, "'{}': {}", path, reason),
        }
    }
}

impl std::error::Error for ConstructError {}

impl From<ConstructError> for String {
    fn from(e: ConstructError) -> Self {
        e.to_string()
    }
}

/// A single construct in the tree.
#[derive(Debug, Clone)]
pub struct Node {
    id: String,
    kind: ConstructKind,
    parent: Option<NodeId>,
    children: IndexMap<String, NodeId>,
    dependencies: Vec<NodeId>,
    /// Resource properties; may contain unresolved tokens
    pub properties: Map<String, Value>,
    /// Tags declared on this node (not inherited ones)
    pub tags: BTreeMap<String, String>,
    /// Free-form description (stacks carry it into their template)
    pub description: Option<String>,
}

impl Node {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &ConstructKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child handles in insertion order.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    /// Explicit dependency edges declared on this node.
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }
}

/// Arena-backed construct tree rooted at an `App` node.
#[derive(Debug, Clone)]
pub struct ConstructTree {
    name: String,
    nodes: Vec<Node>,
}

impl ConstructTree {
    /// Create a tree holding only the app root.
    pub fn new(app_name: &str) -> Self {
        let root = Node {
            id: String::new(),
            kind: ConstructKind::App,
            parent: None,
            children: IndexMap::new(),
            dependencies: Vec::new(),
            properties: Map::new(),
            tags: BTreeMap::new(),
            description: None,
        };
        Self {
            name: app_name.to_string(),
            nodes: vec![root],
        }
    }

    /// App name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has its root, so it is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Create a node named `id` under `parent`.
    ///
    /// Fails if `id` is malformed or a sibling already uses it; the tree is
    /// unchanged on failure.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        id: &str,
        kind: ConstructKind,
    ) -> Result<NodeId, ConstructError> {
        validate_id(id)?;
        let parent_node = self.get(parent)?;
        if parent_node.children.contains_key(id) {
            return Err(ConstructError::DuplicateId {
                scope: self.path(parent),
                id: id.to_string(),
            });
        }

        let handle = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id: id.to_string(),
            kind,
            parent: Some(parent),
            children: IndexMap::new(),
            dependencies: Vec::new(),
            properties: Map::new(),
            tags: BTreeMap::new(),
            description: None,
        });
        self.nodes[parent.0].children.insert(id.to_string(), handle);
        Ok(handle)
    }

    /// Look up a node, failing on a foreign handle.
    pub fn get(&self, id: NodeId) -> Result<&Node, ConstructError> {
        self.nodes.get(id.0).ok_or(ConstructError::UnknownNode(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, ConstructError> {
        self.nodes.get_mut(id.0).ok_or(ConstructError::UnknownNode(id))
    }

    /// Look up a node by a handle known to come from this tree.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Child handles of `id` in insertion order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| n.children().collect())
            .unwrap_or_default()
    }

    /// Find a direct child by its local id.
    pub fn find_child(&self, parent: NodeId, id: &str) -> Option<NodeId> {
        self.node(parent)?.children.get(id).copied()
    }

    /// Resolve a `/`-separated path from the root. The empty path is the root.
    pub fn try_find_by_path(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.find_child(current, component)?;
        }
        Some(current)
    }

    /// Path components from the root (exclusive) down to `id`.
    pub fn path_components(&self, id: NodeId) -> Vec<&str> {
        self.scopes(id)
            .into_iter()
            .filter_map(|s| self.node(s))
            .map(|n| n.id.as_str())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// `/`-joined path of `id`; the root's path is empty.
    pub fn path(&self, id: NodeId) -> String {
        self.path_components(id).join("/")
    }

    /// Ancestors of `id` from the root down to and including `id`.
    pub fn scopes(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            match self.node(c) {
                Some(n) => {
                    chain.push(c);
                    current = n.parent;
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// True if `ancestor` is `id` or one of its ancestors.
    pub fn is_scope_of(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.scopes(id).contains(&ancestor)
    }

    /// Nearest enclosing stack, `id` itself included.
    pub fn stack_of(&self, id: NodeId) -> Option<NodeId> {
        self.nearest(id, |k| *k == ConstructKind::Stack)
    }

    /// Nearest enclosing stage, `id` itself included.
    pub fn stage_of(&self, id: NodeId) -> Option<NodeId> {
        self.nearest(id, |k| *k == ConstructKind::Stage)
    }

    fn nearest(&self, id: NodeId, pred: impl Fn(&ConstructKind) -> bool) -> Option<NodeId> {
        self.scopes(id)
            .into_iter()
            .rev()
            .find(|s| self.node(*s).is_some_and(|n| pred(&n.kind)))
    }

    /// All stacks in pre-order.
    pub fn stacks(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| n.kind == ConstructKind::Stack)
            .map(|(id, _)| id)
            .collect()
    }

    /// Resource nodes at or below `scope`, in pre-order.
    pub fn resources_under(&self, scope: NodeId) -> Vec<NodeId> {
        self.iter_from(scope)
            .filter(|(_, n)| n.kind.is_resource())
            .map(|(id, _)| id)
            .collect()
    }

    /// Record that `from` must be created after `to`.
    pub fn add_dependency(&mut self, from: NodeId, to: NodeId) -> Result<(), ConstructError> {
        self.get(to)?;
        if from == to {
            return Err(ConstructError::SelfDependency {
                path: self.path(from),
            });
        }
        let node = self.get_mut(from)?;
        if !node.dependencies.contains(&to) {
            node.dependencies.push(to);
        }
        Ok(())
    }

    /// Dependencies that apply to a resource node.
    ///
    /// Edges declared on the node itself and on non-resource scopes between
    /// it and its stack. A target that is not a resource expands to every
    /// resource under it. Targets enclosing `id` and `id` itself are dropped.
    pub fn effective_dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let stack = self.stack_of(id);
        let mut declared: Vec<NodeId> = Vec::new();
        for scope in self.scopes(id) {
            let Some(node) = self.node(scope) else {
                continue;
            };
            let inherits = scope == id
                || (!node.kind.is_resource()
                    && stack.is_some_and(|s| self.is_scope_of(s, scope) && s != scope));
            if inherits {
                declared.extend(node.dependencies.iter().copied());
            }
        }

        let mut out = Vec::new();
        for target in declared {
            if self.is_scope_of(target, id) {
                continue;
            }
            for r in self.resources_under(target) {
                if r != id && !out.contains(&r) {
                    out.push(r);
                }
            }
        }
        out
    }

    pub fn set_property(&mut self, id: NodeId, key: &str, value: Value) -> Result<(), ConstructError> {
        self.get_mut(id)?.properties.insert(key.to_string(), value);
        Ok(())
    }

    pub fn add_tag(&mut self, id: NodeId, key: &str, value: &str) -> Result<(), ConstructError> {
        self.get_mut(id)?
            .tags
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Tags in effect at `id`; nearer scopes override farther ones.
    pub fn tags_of(&self, id: NodeId) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        for scope in self.scopes(id) {
            if let Some(n) = self.node(scope) {
                for (k, v) in &n.tags {
                    tags.insert(k.clone(), v.clone());
                }
            }
        }
        tags
    }

    /// Stable logical id of a resource within its stack.
    ///
    /// A resource directly under its stack keeps its (alphanumeric) id.
    /// Deeper resources concatenate the alphanumeric parts of the
    /// stack-relative path and append an 8-character digest of the full path.
    pub fn unique_id(&self, id: NodeId) -> Result<String, ConstructError> {
        let node = self.get(id)?;
        let stack = self.stack_of(id).ok_or_else(|| ConstructError::InvalidScope {
            path: self.path(id),
            reason: "has no enclosing stack".to_string(),
        })?;
        if stack == id {
            return Err(ConstructError::InvalidScope {
                path: self.path(id),
                reason: "a stack has no logical id".to_string(),
            });
        }

        let full = self.path_components(id);
        let stack_depth = self.path_components(stack).len();
        let relative = &full[stack_depth..];

        if relative.len() == 1 {
            let human = alphanumeric(&node.id);
            if !human.is_empty() {
                return Ok(human);
            }
        }

        let mut human: String = relative.iter().map(|c| alphanumeric(c)).collect();
        human.truncate(MAX_HUMAN_LEN);
        Ok(format!("{}{}", human, hasher::path_digest(&full)))
    }

    /// Pre-order traversal from the root.
    pub fn iter(&self) -> TreeIterator<'_> {
        self.iter_from(self.root())
    }

    /// Pre-order traversal of the subtree at `start`.
    pub fn iter_from(&self, start: NodeId) -> TreeIterator<'_> {
        TreeIterator::new(self, start)
    }

    /// Post-order traversal from the root.
    pub fn iter_postorder(&self) -> PostOrderIterator<'_> {
        PostOrderIterator::new(self, self.root())
    }

    /// Number of levels below and including the root.
    pub fn depth(&self) -> usize {
        self.iter()
            .map(|(id, _)| self.scopes(id).len())
            .max()
            .unwrap_or(0)
    }
}

/// Characters allowed in ids, after a leading alphanumeric.
pub fn validate_id(id: &str) -> Result<(), ConstructError> {
    let invalid = |reason: &str| ConstructError::InvalidId {
        id: id.to_string(),
        reason: reason.to_string(),
    };
    let mut chars = id.chars();
    match chars.next() {
        None => return Err(invalid("must not be empty")),
        Some(c) if !c.is_ascii_alphanumeric() => {
            return Err(invalid("must start with a letter or digit"))
        }
        Some(_) => {}
    }
    if id.contains('/') {
        return Err(invalid("'/' is the path separator"));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))) {
        return Err(invalid(&format!("character '{}' is not allowed", bad)));
    }
    Ok(())
}

fn alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

pub struct TreeIterator<'a> {
    tree: &'a ConstructTree,
    stack: Vec<NodeId>,
}

impl<'a> TreeIterator<'a> {
    fn new(tree: &'a ConstructTree, start: NodeId) -> Self {
        let stack = if tree.node(start).is_some() {
            vec![start]
        } else {
            Vec::new()
        };
        Self { tree, stack }
    }
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        let node = self.tree.node(current)?;
        // Reverse push keeps left-to-right (insertion) order
        for child in node.children.values().rev() {
            self.stack.push(*child);
        }
        Some((current, node))
    }
}

pub struct PostOrderIterator<'a> {
    tree: &'a ConstructTree,
    stack: Vec<(NodeId, bool)>,
}

impl<'a> PostOrderIterator<'a> {
    fn new(tree: &'a ConstructTree, start: NodeId) -> Self {
        Self {
            tree,
            stack: vec![(start, false)],
        }
    }
}

impl<'a> Iterator for PostOrderIterator<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((current, visited)) = self.stack.pop() {
            let Some(node) = self.tree.node(current) else {
                continue;
            };
            if visited {
                return Some((current, node));
            }
            self.stack.push((current, true));
            for child in node.children.values().rev() {
                self.stack.push((*child, false));
            }
        }
        None
    }
}
