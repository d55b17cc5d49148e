//! YAML parsing and validation.
//!
//! Parses strata.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Stack, stage and construct ids must be valid and unique per scope
//! - Required fields per construct type
//! - `function`, `grants` and `depends_on` must point at declared constructs

use super::tree::validate_id;
use super::types::*;
use crate::constructs::api::METHODS;
use indexmap::IndexMap;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn error(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError { message });
}

/// Parse a strata.yaml file from disk.
pub fn parse_app_file(path: &Path) -> Result<AppConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_app(&content)
}

/// Parse a strata.yaml from a string.
pub fn parse_app(yaml: &str) -> Result<AppConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// What a declared path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Declared {
    Stage,
    Stack,
    Construct(ConstructType),
}

/// Every stack with its absolute path prefix, in build order: top-level
/// stacks first, then each stage's stacks.
pub fn stacks_in_order(config: &AppConfig) -> Vec<(String, Option<&str>, &StackDecl)> {
    let mut out: Vec<(String, Option<&str>, &StackDecl)> = config
        .stacks
        .iter()
        .map(|(id, s)| (id.clone(), None, s))
        .collect();
    for (stage_id, stage) in &config.stages {
        for (id, s) in &stage.stacks {
            out.push((format!("{}/{}", stage_id, id), Some(stage_id.as_str()), s));
        }
    }
    out
}

/// Validate a parsed app. Returns a list of errors (empty = valid).
pub fn validate_app(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        error(
            &mut errors,
            format!("version must be \"1.0\", got \"{}\"", config.version),
        );
    }
    if config.name.is_empty() {
        error(&mut errors, "name must not be empty".to_string());
    }
    if config.stacks.is_empty() && config.stages.values().all(|s| s.stacks.is_empty()) {
        error(&mut errors, "app declares no stacks".to_string());
    }

    for id in config.stages.keys() {
        check_id(&mut errors, "stage", id);
        if config.stacks.contains_key(id) {
            error(
                &mut errors,
                format!("'{}' is declared both as a stack and as a stage", id),
            );
        }
    }

    // First pass: declared paths in build order
    let mut declared: IndexMap<String, Declared> = IndexMap::new();
    for id in config.stages.keys() {
        declared.insert(id.clone(), Declared::Stage);
    }
    // Artifact ids join path parts with '-', which ids may also contain
    let mut artifacts: IndexMap<String, String> = IndexMap::new();
    for (path, _, stack) in stacks_in_order(config) {
        let id = path.rsplit('/').next().unwrap_or(path.as_str());
        check_id(&mut errors, "stack", id);
        let artifact = path.replace('/', "-");
        if let Some(other) = artifacts.get(&artifact) {
            error(
                &mut errors,
                format!(
                    "stacks '{}' and '{}' both synthesize to artifact '{}'",
                    other, path, artifact
                ),
            );
        } else {
            artifacts.insert(artifact, path.clone());
        }
        declared.insert(path.clone(), Declared::Stack);
        for (id, decl) in &stack.constructs {
            collect(&mut errors, &mut declared, &path, id, decl);
        }
    }

    // Second pass: references
    for (path, _, stack) in stacks_in_order(config) {
        for (id, decl) in &stack.constructs {
            check_references(&mut errors, &declared, &format!("{}/{}", path, id), decl);
        }
    }

    errors
}

fn check_id(errors: &mut Vec<ValidationError>, what: &str, id: &str) {
    if let Err(e) = validate_id(id) {
        error(errors, format!("{}: {}", what, e));
    }
}

fn collect(
    errors: &mut Vec<ValidationError>,
    declared: &mut IndexMap<String, Declared>,
    scope: &str,
    id: &str,
    decl: &ConstructDecl,
) {
    let path = format!("{}/{}", scope, id);
    check_id(errors, "construct", id);
    check_fields(errors, &path, decl);

    // A rest_api handler must already exist when the API is built
    if decl.construct_type == ConstructType::RestApi {
        if let Some(function) = &decl.function {
            match declared.get(function) {
                Some(Declared::Construct(ConstructType::Function)) => {}
                Some(other) => error(
                    errors,
                    format!(
                        "construct '{}' (rest_api) function '{}' is a {}, not a function",
                        path,
                        function,
                        describe(*other)
                    ),
                ),
                None => error(
                    errors,
                    format!(
                        "construct '{}' (rest_api) references unknown function '{}' (it must be declared before the API)",
                        path, function
                    ),
                ),
            }
        }
    }

    declared.insert(path.clone(), Declared::Construct(decl.construct_type));
    for (child_id, child) in &decl.children {
        collect(errors, declared, &path, child_id, child);
    }
}

fn check_fields(errors: &mut Vec<ValidationError>, path: &str, decl: &ConstructDecl) {
    let kind = decl.construct_type;
    let mut missing = |field: &str| {
        error(
            errors,
            format!("construct '{}' ({}) has no {}", path, kind, field),
        )
    };
    match kind {
        ConstructType::Table => {
            if decl.partition_key.as_deref().unwrap_or_default().is_empty() {
                missing("partition_key");
            }
        }
        ConstructType::Function => {
            if decl.handler.as_deref().unwrap_or_default().is_empty() {
                missing("handler");
            }
        }
        ConstructType::RestApi => {
            if decl.function.is_none() {
                missing("function");
            }
        }
        ConstructType::Resource => {
            if decl.resource_type.is_none() {
                missing("resource_type");
            }
        }
        ConstructType::Group | ConstructType::Bucket => {}
    }

    if kind != ConstructType::Group && !decl.children.is_empty() {
        error(
            errors,
            format!("construct '{}' ({}) cannot have children; only groups nest", path, kind),
        );
    }
    if kind != ConstructType::Function && !decl.grants.is_empty() {
        error(
            errors,
            format!("construct '{}' ({}) cannot declare grants", path, kind),
        );
    }
    if kind == ConstructType::RestApi {
        for route in &decl.routes {
            if !METHODS.contains(&route.method.to_ascii_uppercase().as_str()) {
                error(
                    errors,
                    format!(
                        "construct '{}' route '{} {}' uses an unsupported method",
                        path, route.method, route.path
                    ),
                );
            }
        }
    }
}

fn check_references(
    errors: &mut Vec<ValidationError>,
    declared: &IndexMap<String, Declared>,
    path: &str,
    decl: &ConstructDecl,
) {
    for grant in &decl.grants {
        match declared.get(grant) {
            Some(Declared::Construct(ConstructType::Table)) => {}
            Some(other) => error(
                errors,
                format!(
                    "construct '{}' grants access to '{}', which is a {}, not a table",
                    path,
                    grant,
                    describe(*other)
                ),
            ),
            None => error(
                errors,
                format!("construct '{}' grants access to unknown table '{}'", path, grant),
            ),
        }
    }

    for dep in &decl.depends_on {
        if dep == path {
            error(errors, format!("construct '{}' depends on itself", path));
        } else if !declared.contains_key(dep) {
            error(
                errors,
                format!("construct '{}' depends on unknown construct '{}'", path, dep),
            );
        }
    }

    for (child_id, child) in &decl.children {
        check_references(errors, declared, &format!("{}/{}", path, child_id), child);
    }
}

fn describe(d: Declared) -> String {
    match d {
        Declared::Stage => "stage".to_string(),
        Declared::Stack => "stack".to_string(),
        Declared::Construct(t) => t.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(yaml: &str) -> Vec<String> {
        let config = parse_app(yaml).unwrap();
        validate_app(&config).into_iter().map(|e| e.message).collect()
    }

    fn assert_error(yaml: &str, needle: &str) {
        let errors = messages(yaml);
        assert!(
            errors.iter().any(|e| e.contains(needle)),
            "expected '{}' in {:?}",
            needle,
            errors
        );
    }

    #[test]
    fn test_parse_valid_app() {
        let yaml = r#"
version: "1.0"
name: shop
stacks:
  Data:
    constructs:
      Orders:
        type: table
        partition_key: id
stages:
  Prod:
    stacks:
      Api:
        constructs:
          Handler:
            type: function
            handler: index.main
            grants: [Data/Orders]
          Http:
            type: rest_api
            function: Prod/Api/Handler
            routes:
              - { method: get, path: /orders }
          Extras:
            type: group
            depends_on: [Data]
            children:
              Topic:
                type: resource
                resource_type: AWS::SNS::Topic
"#;
        let errors = messages(yaml);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_parse_bad_version_and_empty_name() {
        let yaml = r#"
version: "2.0"
name: ""
stacks:
  S: {}
"#;
        assert_error(yaml, "version");
        assert_error(yaml, "name must not be empty");
    }

    #[test]
    fn test_parse_no_stacks() {
        assert_error("version: \"1.0\"\nname: x\n", "no stacks");
    }

    #[test]
    fn test_parse_invalid_ids() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  "bad stack":
    constructs:
      "-lead": { type: bucket }
"#;
        assert_error(yaml, "stack: invalid construct id 'bad stack'");
        assert_error(yaml, "construct: invalid construct id '-lead'");
    }

    #[test]
    fn test_parse_stack_stage_collision() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  Prod: {}
stages:
  Prod:
    stacks:
      Api: {}
"#;
        assert_error(yaml, "both as a stack and as a stage");
    }

    #[test]
    fn test_parse_missing_required_fields() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  S:
    constructs:
      T: { type: table }
      F: { type: function }
      R: { type: resource }
      A: { type: rest_api }
"#;
        assert_error(yaml, "'S/T' (table) has no partition_key");
        assert_error(yaml, "'S/F' (function) has no handler");
        assert_error(yaml, "'S/R' (resource) has no resource_type");
        assert_error(yaml, "'S/A' (rest_api) has no function");
    }

    #[test]
    fn test_parse_children_only_on_groups() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  S:
    constructs:
      B:
        type: bucket
        children:
          Inner: { type: bucket }
"#;
        assert_error(yaml, "cannot have children");
    }

    #[test]
    fn test_parse_api_function_declared_later() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  S:
    constructs:
      Http:
        type: rest_api
        function: S/Handler
      Handler:
        type: function
        handler: main
"#;
        assert_error(yaml, "must be declared before the API");
    }

    #[test]
    fn test_parse_api_function_wrong_type() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  S:
    constructs:
      Store: { type: bucket }
      Http:
        type: rest_api
        function: S/Store
"#;
        assert_error(yaml, "is a bucket, not a function");
    }

    #[test]
    fn test_parse_bad_route_method() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  S:
    constructs:
      F: { type: function, handler: main }
      Http:
        type: rest_api
        function: S/F
        routes: [{ method: FETCH, path: / }]
"#;
        assert_error(yaml, "unsupported method");
    }

    #[test]
    fn test_parse_grants() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  S:
    constructs:
      Store: { type: bucket }
      F:
        type: function
        handler: main
        grants: [S/Store, S/Missing]
      G:
        type: bucket
        grants: [S/Store]
"#;
        assert_error(yaml, "which is a bucket, not a table");
        assert_error(yaml, "unknown table 'S/Missing'");
        assert_error(yaml, "(bucket) cannot declare grants");
    }

    #[test]
    fn test_parse_grant_may_point_forward() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  Api:
    constructs:
      F:
        type: function
        handler: main
        grants: [Data/T]
  Data:
    constructs:
      T: { type: table, partition_key: id }
"#;
        assert!(messages(yaml).is_empty());
    }

    #[test]
    fn test_parse_artifact_id_collision() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  Prod-Api: {}
stages:
  Prod:
    stacks:
      Api: {}
"#;
        assert_error(
            yaml,
            "stacks 'Prod-Api' and 'Prod/Api' both synthesize to artifact 'Prod-Api'",
        );
    }

    #[test]
    fn test_parse_dependencies() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  S:
    constructs:
      A:
        type: bucket
        depends_on: [S/A, S/Ghost]
"#;
        assert_error(yaml, "'S/A' depends on itself");
        assert_error(yaml, "unknown construct 'S/Ghost'");
    }

    #[test]
    fn test_parse_nested_references_checked() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  S:
    constructs:
      G:
        type: group
        children:
          Inner:
            type: bucket
            depends_on: [Nowhere]
"#;
        assert_error(yaml, "'S/G/Inner' depends on unknown construct 'Nowhere'");
    }

    #[test]
    fn test_parse_stacks_in_order() {
        let yaml = r#"
version: "1.0"
name: x
stages:
  Prod:
    stacks:
      Api: {}
stacks:
  Data: {}
"#;
        let config = parse_app(yaml).unwrap();
        let order: Vec<_> = stacks_in_order(&config)
            .into_iter()
            .map(|(p, stage, _)| (p, stage.map(str::to_string)))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Data".to_string(), None),
                ("Prod/Api".to_string(), Some("Prod".to_string()))
            ]
        );
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.yaml");
        std::fs::write(
            &path,
            "version: \"1.0\"\nname: file-test\nstacks:\n  S: {}\n",
        )
        .unwrap();
        let config = parse_app_file(&path).unwrap();
        assert_eq!(config.name, "file-test");
    }

    #[test]
    fn test_parse_missing_file() {
        let err = parse_app_file(Path::new("/nonexistent/strata.yaml")).unwrap_err();
        assert!(err.contains("failed to read"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        assert!(parse_app("not: [valid: yaml: {{").is_err());
    }
}
