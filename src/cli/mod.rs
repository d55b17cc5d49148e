//! CLI subcommands: init, validate, synth, tree, ls, order, verify, schema.

use crate::constructs::stack::artifact_id;
use crate::core::{assembly, builder, parser, resolver, synth, types};
use crate::provenance::eventlog;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new strata project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate strata.yaml without synthesizing
    Validate {
        /// Path to strata.yaml
        #[arg(short, long, default_value = "strata.yaml")]
        file: PathBuf,
    },

    /// Synthesize templates into a cloud assembly
    Synth {
        /// Path to strata.yaml
        #[arg(short, long, default_value = "strata.yaml")]
        file: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "strata.out")]
        out: PathBuf,

        /// Print one stack's template (by artifact id) instead of writing
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print the construct tree
    Tree {
        /// Path to strata.yaml
        #[arg(short, long, default_value = "strata.yaml")]
        file: PathBuf,
    },

    /// List stacks in deployment order
    Ls {
        /// Path to strata.yaml
        #[arg(short, long, default_value = "strata.yaml")]
        file: PathBuf,
    },

    /// Show deployment order, or resource creation order within one stack
    Order {
        /// Path to strata.yaml
        #[arg(short, long, default_value = "strata.yaml")]
        file: PathBuf,

        /// Artifact id of the stack to order resources for
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Check written templates against the manifest hashes
    Verify {
        /// Output directory
        #[arg(short, long, default_value = "strata.out")]
        out: PathBuf,
    },

    /// Print the JSON schema of strata.yaml
    Schema,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Synth { file, out, stack } => cmd_synth(&file, &out, stack.as_deref()),
        Commands::Tree { file } => cmd_tree(&file),
        Commands::Ls { file } => cmd_ls(&file),
        Commands::Order { file, stack } => cmd_order(&file, stack.as_deref()),
        Commands::Verify { out } => cmd_verify(&out),
        Commands::Schema => cmd_schema(),
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: my-app
description: "Managed by strata"

params:
  env: dev

tags:
  app: my-app

stacks:
  Data:
    description: "Storage ({{params.env}})"
    constructs:
      Items:
        type: table
        partition_key: id

stages:
  Dev:
    stacks:
      Api:
        constructs:
          Handler:
            type: function
            handler: bootstrap
            grants: [Data/Items]
          Http:
            type: rest_api
            function: Dev/Api/Handler
            routes:
              - { method: GET, path: /items }
              - { method: POST, path: /items }
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("strata.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, INIT_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized strata project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_app_file(file)?;
    let errors = parser::validate_app(&config);

    if errors.is_empty() {
        let stacks = parser::stacks_in_order(&config).len();
        println!(
            "OK: {} ({} stages, {} stacks)",
            config.name,
            config.stages.len(),
            stacks
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse a strata file and compose its tree.
fn load_app(file: &Path) -> Result<(types::AppConfig, builder::BuiltApp), String> {
    let config = parser::parse_app_file(file)?;
    let app = builder::build_app(&config)?;
    Ok((config, app))
}

/// Synthesize into `out`, or print one stack's template.
///
/// Every run over a parseable file is logged, including validation and
/// build failures. A file that is not valid YAML names no app and is not
/// logged.
fn cmd_synth(file: &Path, out: &Path, stack: Option<&str>) -> Result<(), String> {
    let config = parser::parse_app_file(file)?;

    if let Some(stack_id) = stack {
        let app = builder::build_app(&config)?;
        let synthesized = synth::synthesize(&app.tree)?;
        let artifact = synthesized
            .artifact(stack_id)
            .ok_or_else(|| format!("no stack '{}' in app '{}'", stack_id, config.name))?;
        print!("{}", synth::render_template(&artifact.template)?);
        return Ok(());
    }

    let run_id = eventlog::generate_run_id();
    let start = Instant::now();
    eventlog::append_event(
        out,
        types::SynthEvent::SynthStarted {
            app: config.name.clone(),
            run_id: run_id.clone(),
            strata_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )?;

    let result = builder::build_app(&config).and_then(|app| {
        let synthesized = synth::synthesize(&app.tree)?;
        assembly::write_assembly(out, &synthesized)?;
        assembly::write_tree(out, &app.tree)?;
        Ok(synthesized)
    });
    let cloud = match result {
        Ok(c) => c,
        Err(e) => {
            eventlog::append_event(
                out,
                types::SynthEvent::SynthFailed {
                    app: config.name.clone(),
                    run_id,
                    error: e.clone(),
                },
            )?;
            return Err(e);
        }
    };

    for artifact in &cloud.artifacts {
        let resources = u32::try_from(artifact.template.resources.len()).unwrap_or(u32::MAX);
        println!(
            "  {} ({} resources) -> {}",
            artifact.id,
            resources,
            out.join(&artifact.template_file).display()
        );
        eventlog::append_event(
            out,
            types::SynthEvent::StackSynthesized {
                app: config.name.clone(),
                run_id: run_id.clone(),
                stack: artifact.id.clone(),
                resources,
                hash: artifact.hash.clone(),
            },
        )?;
    }

    let elapsed = start.elapsed().as_secs_f64();
    eventlog::append_event(
        out,
        types::SynthEvent::SynthCompleted {
            app: config.name.clone(),
            run_id,
            stacks: u32::try_from(cloud.artifacts.len()).unwrap_or(u32::MAX),
            hash: cloud.hash.clone(),
            total_seconds: elapsed,
        },
    )?;

    println!();
    println!(
        "Synthesized {} stack(s) for {} in {:.3}s ({})",
        cloud.artifacts.len(),
        config.name,
        elapsed,
        cloud.hash
    );
    Ok(())
}

fn cmd_tree(file: &Path) -> Result<(), String> {
    let (_, app) = load_app(file)?;
    let tree = &app.tree;
    for (id, node) in tree.iter() {
        let depth = tree.scopes(id).len() - 1;
        let indent = "  ".repeat(depth);
        if node.parent().is_none() {
            println!("{} [app]", tree.name());
        } else {
            println!("{}{} [{}]", indent, node.id(), node.kind());
        }
    }
    Ok(())
}

fn cmd_ls(file: &Path) -> Result<(), String> {
    let (_, app) = load_app(file)?;
    for stack in resolver::deployment_order(&app.tree)? {
        println!("{}", artifact_id(&app.tree, stack));
    }
    Ok(())
}

fn cmd_order(file: &Path, stack: Option<&str>) -> Result<(), String> {
    let (_, app) = load_app(file)?;
    let tree = &app.tree;

    let Some(stack_id) = stack else {
        let deps = resolver::stack_dependencies(tree)?;
        for (i, s) in resolver::deployment_order(tree)?.into_iter().enumerate() {
            let after: Vec<String> = deps
                .get(&s)
                .map(|d| d.iter().map(|n| artifact_id(tree, *n)).collect())
                .unwrap_or_default();
            if after.is_empty() {
                println!("{}. {}", i + 1, artifact_id(tree, s));
            } else {
                println!("{}. {} (after {})", i + 1, artifact_id(tree, s), after.join(", "));
            }
        }
        return Ok(());
    };

    let node = tree
        .stacks()
        .into_iter()
        .find(|s| artifact_id(tree, *s) == stack_id)
        .ok_or_else(|| format!("no stack '{}' in app '{}'", stack_id, tree.name()))?;
    let logical_ids = synth::assign_logical_ids(tree)?;
    for (i, r) in resolver::resource_order(tree, node)?.into_iter().enumerate() {
        let logical = logical_ids.get(&r).map(String::as_str).unwrap_or("?");
        println!("{}. {} ({})", i + 1, logical, tree.path(r));
    }
    Ok(())
}

fn cmd_verify(out: &Path) -> Result<(), String> {
    let problems = assembly::verify_assembly(out)?;
    if problems.is_empty() {
        println!("OK: {} matches its manifest", out.display());
        return Ok(());
    }
    for p in &problems {
        eprintln!("  MISMATCH: {}", p);
    }
    Err(format!("{} problem(s) in {}", problems.len(), out.display()))
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(types::AppConfig);
    let json =
        serde_json::to_string_pretty(&schema).map_err(|e| format!("serialize error: {}", e))?;
    println!("{}", json);
    Ok(())
}
