//! Declarative app definition, synthesized assembly, and provenance events.
//!
//! The app definition is the YAML form of a construct tree: stages contain
//! stacks, stacks contain constructs, and `group` constructs nest further
//! constructs. Maps are order-preserving because insertion order drives
//! deterministic naming and output.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Top-level strata.yaml
// ============================================================================

/// Root configuration: one app, its stages and stacks.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AppConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// App name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Template parameters (`{{params.key}}`)
    #[serde(default)]
    pub params: IndexMap<String, serde_json::Value>,

    /// Tags applied to every resource in the app
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Stacks directly under the app
    #[serde(default)]
    pub stacks: IndexMap<String, StackDecl>,

    /// Stages, each grouping its own stacks
    #[serde(default)]
    pub stages: IndexMap<String, StageDecl>,
}

/// A named group of stacks deployed together.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StageDecl {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub stacks: IndexMap<String, StackDecl>,
}

/// A deployable unit of constructs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StackDecl {
    #[serde(default)]
    pub description: Option<String>,

    /// Target account and region
    #[serde(default)]
    pub env: Option<Environment>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Constructs declared in this stack (order-preserving)
    #[serde(default)]
    pub constructs: IndexMap<String, ConstructDecl>,
}

/// Deployment target of a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Environment {
    #[serde(default)]
    pub account: Option<String>,

    #[serde(default)]
    pub region: Option<String>,
}

// ============================================================================
// Constructs
// ============================================================================

/// A single construct declaration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConstructDecl {
    /// Construct type
    #[serde(rename = "type")]
    pub construct_type: ConstructType,

    /// Absolute paths of constructs that must be created first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Tags for this construct and everything below it
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    // -- Table fields --
    #[serde(default)]
    pub partition_key: Option<String>,

    #[serde(default)]
    pub sort_key: Option<String>,

    #[serde(default)]
    pub billing: Option<BillingMode>,

    // -- Function fields --
    /// Entry point, e.g. `index.handler`
    #[serde(default)]
    pub handler: Option<String>,

    #[serde(default)]
    pub runtime: Option<String>,

    /// Code asset path
    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub memory_mb: Option<u32>,

    #[serde(default)]
    pub timeout_secs: Option<u32>,

    #[serde(default)]
    pub environment: IndexMap<String, String>,

    /// Table paths this function reads and writes
    #[serde(default)]
    pub grants: Vec<String>,

    // -- RestApi fields --
    /// Path of the function serving the API
    #[serde(default)]
    pub function: Option<String>,

    #[serde(default)]
    pub routes: Vec<RouteDecl>,

    // -- Bucket fields --
    #[serde(default)]
    pub versioned: Option<bool>,

    #[serde(default)]
    pub public_read: Option<bool>,

    // -- Raw resource fields --
    #[serde(default)]
    pub resource_type: Option<String>,

    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,

    // -- Group fields --
    #[serde(default)]
    pub children: IndexMap<String, ConstructDecl>,
}

/// Construct type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConstructType {
    Group,
    Table,
    Function,
    RestApi,
    Bucket,
    Resource,
}

impl fmt::Display for ConstructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => write!(f, "group"),
            Self::Table => write!(f, "table"),
            Self::Function => write!(f, "function"),
            Self::RestApi => write!(f, "rest_api"),
            Self::Bucket => write!(f, "bucket"),
            Self::Resource => write!(f, "resource"),
        }
    }
}

/// Table billing mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    #[default]
    PayPerRequest,
    Provisioned,
}

impl fmt::Display for BillingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayPerRequest => write!(f, "PAY_PER_REQUEST"),
            Self::Provisioned => write!(f, "PROVISIONED"),
        }
    }
}

/// An HTTP route on a REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RouteDecl {
    pub method: String,
    pub path: String,
}

// ============================================================================
// Cloud assembly
// ============================================================================

/// Output of synthesis: every stack template plus a deployment manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudAssembly {
    /// Assembly format version
    pub version: String,

    /// App name
    pub app: String,

    /// Composite hash over all artifact hashes
    pub hash: String,

    /// Stack artifacts in deployment order
    pub artifacts: Vec<StackArtifact>,
}

impl CloudAssembly {
    /// Find an artifact by id.
    pub fn artifact(&self, id: &str) -> Option<&StackArtifact> {
        self.artifacts.iter().find(|a| a.id == id)
    }
}

/// One deployable stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackArtifact {
    /// Artifact id (path components joined by `-`)
    pub id: String,

    /// Construct path of the stack
    pub path: String,

    /// Enclosing stage, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    /// Artifact ids that must deploy first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Template file name relative to the output directory
    pub template_file: String,

    /// BLAKE3 of the rendered template
    pub hash: String,

    /// The template itself; written to its own file, not the manifest
    #[serde(skip)]
    pub template: StackTemplate,
}

/// A CloudFormation-shaped stack template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackTemplate {
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Resources")]
    pub resources: IndexMap<String, TemplateResource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, TemplateOutput>,
}

/// A single resource entry in a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties", default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,

    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(rename = "Metadata", default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// An exported value consumed by another stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateOutput {
    #[serde(rename = "Value")]
    pub value: serde_json::Value,

    #[serde(rename = "Export")]
    pub export: ExportName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportName {
    #[serde(rename = "Name")]
    pub name: String,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Synthesis event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SynthEvent {
    SynthStarted {
        app: String,
        run_id: String,
        strata_version: String,
    },
    StackSynthesized {
        app: String,
        run_id: String,
        stack: String,
        resources: u32,
        hash: String,
    },
    SynthCompleted {
        app: String,
        run_id: String,
        stacks: u32,
        hash: String,
        total_seconds: f64,
    },
    SynthFailed {
        app: String,
        run_id: String,
        error: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: SynthEvent,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a parameter value to a string for template resolution.
pub fn json_value_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
