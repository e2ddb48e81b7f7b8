//! Tiered CLI
//!
//! The `tiered` command drives the orchestration engine from files on disk.
//!
//! ## Commands
//!
//! - `hash`: validate a specification and print its digest and run id
//! - `check-tunables`: load and validate a tunables TOML file
//! - `aggregate`: roll a JSON array of scored results up the four levels
//! - `run`: full pipeline dry run with payload-echo units

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use tiered_core::{
    aggregate_hierarchy, validate_specification, AnalyticalUnit, Document, Evidence,
    EvidenceFieldScorer, HierarchyReport, Orchestrator, PipelineTunables, RawSpecification,
    RunReport, RunSpan, ScoredResult, TaskDescriptor, UnitContext, UnitRegistry,
};

#[derive(Parser)]
#[command(name = "tiered")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fixed-stage orchestration and hierarchical score synthesis", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// The three specification files.
#[derive(clap::Args, Debug, Clone)]
struct SpecArgs {
    /// Questionnaire JSON
    #[arg(short, long)]
    questionnaire: PathBuf,

    /// Method map JSON
    #[arg(short, long)]
    methods: PathBuf,

    /// Optional schema JSON
    #[arg(short, long)]
    schema: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configuration gate and print the specification digest
    Hash {
        #[command(flatten)]
        spec: SpecArgs,
    },

    /// Load and validate a tunables file (environment overrides applied)
    CheckTunables {
        /// Tunables TOML
        path: PathBuf,
    },

    /// Aggregate scored results through dimension, area, cluster and macro
    Aggregate {
        /// JSON array of scored results
        #[arg(long)]
        scored: PathBuf,

        /// Tunables TOML supplying weights, coverage and thresholds
        #[arg(short, long)]
        tunables: Option<PathBuf>,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Drive a document through the full pipeline. Every unit echoes its
    /// item's `payload.evidence`.
    Run {
        #[command(flatten)]
        spec: SpecArgs,

        /// Plain-text document; paragraphs become chunks
        #[arg(short, long)]
        document: PathBuf,

        /// Tunables TOML
        #[arg(short, long)]
        tunables: PathBuf,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tiered_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Hash { spec } => {
            let out = cmd_hash(&spec)?;
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Commands::CheckTunables { path } => {
            let tunables = cmd_check_tunables(&path)?;
            println!(
                "ok: max_concurrent_tasks={} failure_threshold={} rate_budget={}",
                tunables.max_concurrent_tasks,
                tunables.failure_threshold,
                tunables
                    .rate_budget
                    .map(|b| format!("{}/s", b.per_second))
                    .unwrap_or_else(|| "none".to_string())
            );
            Ok(())
        }
        Commands::Aggregate {
            scored,
            tunables,
            output,
        } => {
            let report = cmd_aggregate(&scored, tunables.as_deref())?;
            emit_json(&report, output.as_deref())
        }
        Commands::Run {
            spec,
            document,
            tunables,
            output,
        } => {
            let report = cmd_run(&spec, &document, &tunables).await?;
            emit_json(&report, output.as_deref())
        }
    }
}

#[derive(Debug, Serialize)]
struct HashOutput {
    spec_digest: String,
    run_id: String,
    version: Option<String>,
    items: usize,
    units: usize,
}

fn read_spec(spec: &SpecArgs) -> Result<RawSpecification> {
    RawSpecification::from_files(&spec.questionnaire, &spec.methods, spec.schema.as_deref())
        .with_context(|| format!("Failed to read specification from {:?}", spec.questionnaire))
}

fn cmd_hash(spec: &SpecArgs) -> Result<HashOutput> {
    let raw = read_spec(spec)?;
    let config = validate_specification(&raw).context("Specification rejected")?;
    Ok(HashOutput {
        items: config.tasks.len(),
        units: config.method_catalog.len(),
        spec_digest: config.spec_digest,
        run_id: config.run_id,
        version: config.version,
    })
}

fn load_tunables(path: &Path) -> Result<PipelineTunables> {
    PipelineTunables::load(path)
        .and_then(PipelineTunables::with_env_overrides)
        .with_context(|| format!("Invalid tunables file: {:?}", path))
}

fn cmd_check_tunables(path: &Path) -> Result<PipelineTunables> {
    load_tunables(path)
}

fn cmd_aggregate(scored: &Path, tunables: Option<&Path>) -> Result<HierarchyReport> {
    let content = std::fs::read_to_string(scored)
        .with_context(|| format!("Failed to read scored results: {:?}", scored))?;
    let results: Vec<ScoredResult> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid scored results JSON in {:?}", scored))?;
    // Only the aggregation sections matter here; concurrency is never used.
    let tunables = match tunables {
        Some(path) => load_tunables(path)?,
        None => PipelineTunables::new(1, 1),
    };

    let _span = RunSpan::enter("aggregate");
    let report = aggregate_hierarchy(&results, &tunables);
    info!(
        results = results.len(),
        dimensions = report.dimensions.scores.len(),
        failures = report.failures().len(),
        "aggregation finished"
    );
    Ok(report)
}

/// Returns the task payload's `evidence` member verbatim.
struct PayloadEcho;

#[async_trait]
impl AnalyticalUnit for PayloadEcho {
    async fn execute(&self, task: &TaskDescriptor, _ctx: &UnitContext) -> Result<Evidence> {
        task.payload
            .get("evidence")
            .cloned()
            .ok_or_else(|| anyhow!("item '{}' has no payload.evidence", task.task_id))
    }
}

fn echo_registry(raw: &RawSpecification) -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    if let Some(methods) = raw.method_map.as_object() {
        for unit_id in methods.keys() {
            registry.register(unit_id.clone(), Arc::new(PayloadEcho));
        }
    }
    registry
}

async fn cmd_run(spec: &SpecArgs, document: &Path, tunables: &Path) -> Result<RunReport> {
    let raw = read_spec(spec)?;
    let text = std::fs::read_to_string(document)
        .with_context(|| format!("Failed to read document: {:?}", document))?;
    let tunables = load_tunables(tunables)?;

    let scorer = Arc::new(EvidenceFieldScorer::new("score", tunables.quality));
    let orchestrator = Orchestrator::new(tunables, echo_registry(&raw), scorer)
        .context("Failed to build orchestrator")?;
    let report = orchestrator
        .run(raw, Document::from_paragraphs(text))
        .await
        .context("Pipeline run failed")?;
    info!(
        status = report.status.as_str(),
        macro_score = ?report.macro_score.as_ref().map(|m| m.score),
        "run finished"
    );
    Ok(report)
}

fn emit_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write report to {:?}", path)),
        None => {
            println!("{rendered}");
            Ok(())
        }
    }
}
