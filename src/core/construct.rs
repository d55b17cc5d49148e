//! The generic construct capability and late-bound attribute tokens.
//!
//! [`Construct`] is what every tree participant offers: its own node handle.
//! Typed constructs create exactly one node for themselves and keep that
//! handle as their identity, so a typed construct passed where a plain
//! construct is expected *is* the tree node; there is no wrapper node to
//! look through.

use super::tree::{ConstructError, ConstructTree, NodeId};
use regex::Regex;
use std::sync::LazyLock;

/// Anything that occupies a position in a [`ConstructTree`].
pub trait Construct {
    /// The node this construct registered as itself.
    fn node_id(&self) -> NodeId;

    /// `/`-joined tree path.
    fn path(&self, tree: &ConstructTree) -> String {
        tree.path(self.node_id())
    }

    /// Require `target` to be created before this construct.
    fn add_dependency(
        &self,
        tree: &mut ConstructTree,
        target: &dyn Construct,
    ) -> Result<(), ConstructError> {
        tree.add_dependency(self.node_id(), target.node_id())
    }

    /// Tag this construct and everything under it.
    fn add_tag(&self, tree: &mut ConstructTree, key: &str, value: &str) -> Result<(), ConstructError> {
        tree.add_tag(self.node_id(), key, value)
    }
}

impl Construct for NodeId {
    fn node_id(&self) -> NodeId {
        *self
    }
}

/// True if both constructs are the same tree participant.
pub fn same_node(a: &dyn Construct, b: &dyn Construct) -> bool {
    a.node_id() == b.node_id()
}

/// Attribute name that resolves to the resource's primary reference.
pub const REF: &str = "Ref";

/// Placeholder for an attribute of a resource, resolved during synthesis.
pub fn token(path: &str, attr: &str) -> String {
    format!("${{Token[{}.{}]}}", path, attr)
}

/// Token for `attr` of the construct at `target`.
pub fn token_for(tree: &ConstructTree, target: &dyn Construct, attr: &str) -> String {
    token(&target.path(tree), attr)
}

/// A token occurrence inside a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRef {
    /// Tree path of the referenced construct
    pub path: String,
    /// Attribute name (`Ref` for the primary reference)
    pub attr: String,
    /// Byte range of the token in the scanned string
    pub span: std::ops::Range<usize>,
}

static TOKEN_PATTERN: LazyLock<Result<Regex, String>> = LazyLock::new(|| {
    Regex::new(r"\$\{Token\[([^\]]+)\]\}").map_err(|e| format!("token pattern: {}", e))
});

/// Find every token in `s`, left to right.
pub fn find_tokens(s: &str) -> Result<Vec<TokenRef>, String> {
    if !s.contains("${Token[") {
        return Ok(Vec::new());
    }
    let pattern = TOKEN_PATTERN.as_ref().map_err(Clone::clone)?;
    pattern
        .captures_iter(s)
        .map(|caps| {
            let whole = caps.get(0).ok_or("token match without span")?;
            let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let (path, attr) = inner
                .rsplit_once('.')
                .ok_or_else(|| format!("malformed token '{}': expected <path>.<attribute>", whole.as_str()))?;
            if attr.is_empty() {
                return Err(format!("malformed token '{}': empty attribute", whole.as_str()));
            }
            Ok(TokenRef {
                path: path.to_string(),
                attr: attr.to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

/// Every token found in the strings of a JSON value.
pub fn tokens_in_value(value: &serde_json::Value) -> Result<Vec<TokenRef>, String> {
    let mut out = Vec::new();
    collect_tokens(value, &mut out)?;
    Ok(out)
}

fn collect_tokens(value: &serde_json::Value, out: &mut Vec<TokenRef>) -> Result<(), String> {
    match value {
        serde_json::Value::String(s) => out.extend(find_tokens(s)?),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_tokens(item, out)?;
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                collect_tokens(v, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}
