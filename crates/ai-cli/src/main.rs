//! `abml` - behavior document tooling.
//!
//! - `abml check <doc>` - compile a document and summarize it, or list its diagnostics
//! - `abml run <doc>` - execute a document with the built-in handlers and print the report
//! - `abml plan <request>` - run the GOAP planner on a YAML request

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use ai_abml::{
    AbmlError, ActionRegistry, Compiler, Document, EngineConfig, Executor, GoapCatalog,
    PlanRequest, RawDocument, ReplanHandler,
};
use ai_core::{CancellationToken, Value, VariableScope};

#[derive(Parser)]
#[command(name = "abml")]
#[command(about = "Compile, run and plan behavior documents", version)]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a document and print a summary
    Check {
        /// Document to compile (.yaml or .json)
        document: PathBuf,
    },

    /// Execute a document and print the JSON report
    Run {
        /// Document to execute (.yaml or .json)
        document: PathBuf,

        /// Initial document variable, `name=value` (value parsed as YAML)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Leave trace events out of the report
        #[arg(long)]
        no_trace: bool,
    },

    /// Plan for `{state, goal, actions, max_depth, max_nodes}` and print the JSON response
    Plan {
        /// Plan request (.yaml or .json)
        request: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Check { document } => check(&document, &config),
        Commands::Run {
            document,
            vars,
            no_trace,
        } => run(&document, vars, no_trace, config),
        Commands::Plan { request } => plan(&request, &config),
    }
}

fn parse_var(input: &str) -> std::result::Result<(String, Value), String> {
    let (name, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected `name=value`, got `{input}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in `{input}`"));
    }
    let value = serde_yaml::from_str(raw).unwrap_or_else(|_| Value::from(raw));
    Ok((name.to_string(), value))
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// Registry with the built-ins plus `trigger_replan` backed by `catalog`.
fn registry(catalog: &Arc<GoapCatalog>, config: &EngineConfig) -> Result<ActionRegistry> {
    let mut registry = ActionRegistry::with_builtins();
    ReplanHandler::new(catalog.clone())
        .with_options(config.planner.options())
        .install(&mut registry)?;
    Ok(registry)
}

fn compile(path: &Path, registry: &ActionRegistry, catalog: &Arc<GoapCatalog>) -> Result<Document> {
    let source = read(path)?;
    let raw = if is_json(path) {
        RawDocument::from_json(&source)
    } else {
        RawDocument::from_yaml(&source)
    };
    let compiled = raw.and_then(|raw| {
        Compiler::new()
            .with_registry(registry)
            .with_catalog(catalog.clone())
            .compile(&raw)
    });

    match compiled {
        Ok(document) => Ok(document),
        Err(AbmlError::Compile {
            document_id,
            diagnostics,
        }) => {
            eprintln!("{}: `{document_id}` failed to compile", path.display());
            for diagnostic in &diagnostics {
                eprintln!("  {diagnostic}");
            }
            bail!("{} problem(s) in {}", diagnostics.len(), path.display())
        }
        Err(err) => Err(err).with_context(|| format!("Failed to load {}", path.display())),
    }
}

fn check(path: &Path, config: &EngineConfig) -> Result<()> {
    let catalog = Arc::new(GoapCatalog::new());
    let registry = registry(&catalog, config)?;
    let document = compile(path, &registry, &catalog)?;

    println!("{} ({})", document.id, document.document_type);
    println!();
    println!("Channels: {}", document.channels.len());
    for channel in &document.channels {
        let start = if channel.auto_start { "auto" } else { "on branch" };
        println!("  - {} ({} steps, {start})", channel.name, channel.steps.len());
    }
    println!("Flows: {}", document.flows.len());
    for (name, steps) in &document.flows {
        println!("  - {name} ({} steps)", steps.len());
    }
    if !document.error_handlers.is_empty() {
        let codes: Vec<&str> = document.error_handlers.keys().map(String::as_str).collect();
        println!("Error handlers: {}", codes.join(", "));
    }
    if !document.goals.is_empty() {
        println!("Goals:");
        for goal in &document.goals {
            println!("  - {} (priority {})", goal.name, goal.priority);
        }
    }
    if !document.goap_actions.is_empty() {
        println!("GOAP actions:");
        for action in &document.goap_actions {
            println!("  - {} (cost {})", action.id, action.cost);
        }
    }
    Ok(())
}

fn run(path: &Path, vars: Vec<(String, Value)>, no_trace: bool, config: EngineConfig) -> Result<()> {
    let catalog = Arc::new(GoapCatalog::new());
    let registry = registry(&catalog, &config)?;
    let document = compile(path, &registry, &catalog)?;

    let mut executor_config = config.executor;
    if no_trace {
        executor_config.record_trace = false;
    }
    let executor = Executor::new(Arc::new(registry)).with_config(executor_config);
    let scope = VariableScope::new().with_variables(vars.into_iter().collect());
    let report = executor.run(&document, scope, &CancellationToken::new());

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_complete() {
        bail!("execution of `{}` ended {:?}", document.id, report.status);
    }
    Ok(())
}

fn plan(path: &Path, config: &EngineConfig) -> Result<()> {
    let source = read(path)?;
    let request: Value = if is_json(path) {
        serde_json::from_str(&source)?
    } else {
        serde_yaml::from_str(&source)?
    };
    let request = PlanRequest::from_value(&request, &[], &[], config.planner.options())
        .with_context(|| format!("Invalid plan request in {}", path.display()))?;
    let response = request.run()?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
