//! Cloud assembly output directory: write, load, verify.
//!
//! Layout:
//! - `manifest.json`: artifacts in deployment order with hashes
//! - `<artifact>.template.json`: one template per stack, nothing else
//! - `tree.json`: construct hierarchy
//! - `events.jsonl`: synthesis event log (see `provenance::eventlog`)

use super::synth::render_template;
use super::tree::{ConstructTree, NodeId};
use super::types::{CloudAssembly, StackArtifact, StackTemplate};
use crate::provenance::hasher;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TREE_FILE: &str = "tree.json";

pub fn manifest_path(out_dir: &Path) -> PathBuf {
    out_dir.join(MANIFEST_FILE)
}

pub fn template_path(out_dir: &Path, artifact: &StackArtifact) -> PathBuf {
    out_dir.join(&artifact.template_file)
}

/// Write a file atomically (write to temp, then rename).
fn write_atomic(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    std::fs::write(&tmp_path, content)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("cannot rename {} → {}: {}", tmp_path.display(), path.display(), e))?;
    Ok(())
}

const TEMPLATE_SUFFIX: &str = ".template.json";

/// Names of the template files present in `out_dir`, sorted.
fn template_files(out_dir: &Path) -> Result<Vec<String>, String> {
    if !out_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(out_dir)
        .map_err(|e| format!("cannot read dir {}: {}", out_dir.display(), e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("cannot read dir {}: {}", out_dir.display(), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(TEMPLATE_SUFFIX) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Write every template, then the manifest. Templates of stacks that are no
/// longer part of the assembly are removed.
pub fn write_assembly(out_dir: &Path, assembly: &CloudAssembly) -> Result<(), String> {
    for stale in template_files(out_dir)? {
        if !assembly.artifacts.iter().any(|a| a.template_file == stale) {
            let path = out_dir.join(&stale);
            std::fs::remove_file(&path)
                .map_err(|e| format!("cannot remove {}: {}", path.display(), e))?;
        }
    }
    for artifact in &assembly.artifacts {
        let rendered = render_template(&artifact.template)?;
        write_atomic(&template_path(out_dir, artifact), &rendered)?;
    }
    let manifest = serde_json::to_string_pretty(assembly)
        .map_err(|e| format!("serialize error: {}", e))?;
    write_atomic(&manifest_path(out_dir), &format!("{}\n", manifest))
}

/// Load the manifest. Returns None if it doesn't exist.
///
/// Templates are not loaded; use [`load_template`].
pub fn load_manifest(out_dir: &Path) -> Result<Option<CloudAssembly>, String> {
    let path = manifest_path(out_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let assembly: CloudAssembly = serde_json::from_str(&content)
        .map_err(|e| format!("invalid manifest {}: {}", path.display(), e))?;
    Ok(Some(assembly))
}

pub fn load_template(out_dir: &Path, artifact: &StackArtifact) -> Result<StackTemplate, String> {
    let path = template_path(out_dir, artifact);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("invalid template {}: {}", path.display(), e))
}

/// Re-hash every template on disk against the manifest.
///
/// Returns one message per problem; empty means the assembly is intact.
pub fn verify_assembly(out_dir: &Path) -> Result<Vec<String>, String> {
    let assembly = load_manifest(out_dir)?
        .ok_or_else(|| format!("no assembly in {}", out_dir.display()))?;
    let mut problems = Vec::new();
    for artifact in &assembly.artifacts {
        let path = template_path(out_dir, artifact);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let actual = hasher::hash_string(&content);
                if actual != artifact.hash {
                    problems.push(format!(
                        "{}: hash mismatch (manifest {}, file {})",
                        artifact.template_file, artifact.hash, actual
                    ));
                }
            }
            Err(_) => problems.push(format!("{}: missing", artifact.template_file)),
        }
    }
    for name in template_files(out_dir)? {
        if !assembly.artifacts.iter().any(|a| a.template_file == name) {
            problems.push(format!("{}: not listed in {}", name, MANIFEST_FILE));
        }
    }
    let hashes: Vec<&str> = assembly.artifacts.iter().map(|a| a.hash.as_str()).collect();
    if hasher::composite_hash(&hashes) != assembly.hash {
        problems.push(format!("{}: assembly hash does not match artifacts", MANIFEST_FILE));
    }
    Ok(problems)
}

/// One node of `tree.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub id: String,
    pub path: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeEntry>,
}

/// Nested view of the tree from `node` down.
pub fn tree_entry(tree: &ConstructTree, node: NodeId) -> TreeEntry {
    let (id, kind) = match tree.node(node) {
        Some(n) if n.parent().is_none() => (tree.name().to_string(), n.kind().to_string()),
        Some(n) => (n.id().to_string(), n.kind().to_string()),
        None => (String::new(), String::new()),
    };
    TreeEntry {
        id,
        path: tree.path(node),
        kind,
        children: tree
            .children(node)
            .into_iter()
            .map(|c| tree_entry(tree, c))
            .collect(),
    }
}

/// Write `tree.json`.
pub fn write_tree(out_dir: &Path, tree: &ConstructTree) -> Result<(), String> {
    let entry = tree_entry(tree, tree.root());
    let json = serde_json::to_string_pretty(&entry).map_err(|e| format!("serialize error: {}", e))?;
    write_atomic(&out_dir.join(TREE_FILE), &format!("{}\n", json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::bucket::{Bucket, BucketProps};
    use crate::constructs::stack::{Stack, StackProps};
    use crate::core::synth::synthesize;

    fn sample_tree() -> ConstructTree {
        let mut tree = ConstructTree::new("site");
        let root = tree.root();
        let web = Stack::new(&mut tree, &root, "Web", StackProps::default()).unwrap();
        Bucket::new(&mut tree, &web, "Assets", BucketProps::default()).unwrap();
        tree
    }

    fn written() -> (tempfile::TempDir, CloudAssembly) {
        let dir = tempfile::tempdir().unwrap();
        let assembly = synthesize(&sample_tree()).unwrap();
        write_assembly(dir.path(), &assembly).unwrap();
        (dir, assembly)
    }

    #[test]
    fn test_assembly_paths() {
        assert_eq!(manifest_path(Path::new("/out")), PathBuf::from("/out/manifest.json"));
    }

    #[test]
    fn test_assembly_write_and_load() {
        let (dir, assembly) = written();
        let loaded = load_manifest(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.hash, assembly.hash);
        assert_eq!(loaded.artifacts.len(), 1);
        assert_eq!(loaded.artifacts[0].id, "Web");
        // Templates live in their own files
        assert!(loaded.artifacts[0].template.resources.is_empty());
        let template = load_template(dir.path(), &loaded.artifacts[0]).unwrap();
        assert_eq!(template, assembly.artifacts[0].template);
    }

    #[test]
    fn test_assembly_load_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_manifest(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_assembly_atomic_write() {
        let (dir, _) = written();
        assert!(!dir.path().join("manifest.json.tmp").exists());
        assert!(!dir.path().join("Web.template.json.tmp").exists());
        assert!(dir.path().join("Web.template.json").exists());
    }

    #[test]
    fn test_assembly_file_hash_matches_manifest() {
        let (dir, assembly) = written();
        let content = std::fs::read_to_string(dir.path().join("Web.template.json")).unwrap();
        assert_eq!(hasher::hash_string(&content), assembly.artifacts[0].hash);
    }

    #[test]
    fn test_assembly_verify_clean() {
        let (dir, _) = written();
        assert!(verify_assembly(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_assembly_verify_detects_tamper() {
        let (dir, _) = written();
        std::fs::write(dir.path().join("Web.template.json"), "{}\n").unwrap();
        let problems = verify_assembly(dir.path()).unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("hash mismatch"));
    }

    #[test]
    fn test_assembly_verify_missing_template() {
        let (dir, _) = written();
        std::fs::remove_file(dir.path().join("Web.template.json")).unwrap();
        let problems = verify_assembly(dir.path()).unwrap();
        assert!(problems[0].contains("missing"));
    }

    #[test]
    fn test_assembly_verify_reports_unlisted_template() {
        let (dir, _) = written();
        std::fs::write(dir.path().join("Old.template.json"), "{}\n").unwrap();
        let problems = verify_assembly(dir.path()).unwrap();
        assert_eq!(problems, vec!["Old.template.json: not listed in manifest.json"]);
    }

    #[test]
    fn test_assembly_rewrite_removes_stale_templates() {
        let (dir, assembly) = written();
        std::fs::write(dir.path().join("Old.template.json"), "{}\n").unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}\n").unwrap();
        write_assembly(dir.path(), &assembly).unwrap();
        assert!(!dir.path().join("Old.template.json").exists());
        assert!(dir.path().join("notes.json").exists());
        assert!(dir.path().join("Web.template.json").exists());
        assert!(verify_assembly(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_assembly_verify_no_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(verify_assembly(dir.path()).is_err());
    }

    #[test]
    fn test_assembly_tree_json() {
        let dir = tempfile::tempdir().unwrap();
        let tree = sample_tree();
        write_tree(dir.path(), &tree).unwrap();
        let content = std::fs::read_to_string(dir.path().join(TREE_FILE)).unwrap();
        let entry: TreeEntry = serde_json::from_str(&content).unwrap();
        assert_eq!(entry.id, "site");
        assert_eq!(entry.kind, "app");
        assert_eq!(entry.children[0].path, "Web");
        assert_eq!(entry.children[0].kind, "stack");
        assert_eq!(entry.children[0].children[0].kind, "AWS::S3::Bucket");
        assert_eq!(entry.children[0].children[0].path, "Web/Assets");
    }
}
