//! mnemo - layered memory engine CLI
//!
//! ## Commands
//!
//! - `check-config`: load, override from the environment and validate a config
//! - `ingest`: retain experiences from a JSON file, optionally recall and consolidate
//! - `health`: report adapter availability

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use mnemo_adapters::{Context, Experience, KeywordAnalyzer, MemoryType};
use mnemo_core::{EngineConfig, MemoryEngine};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "mnemo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Layered memory engine for AI agents", long_about = None)]
struct Cli {
    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true, env = "MNEMO_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the selected backends
    CheckConfig,

    /// Retain every experience in a JSON file
    ///
    /// The file holds an array whose items are either plain strings or
    /// experience objects (`content`, optional `timestamp`, `metadata`).
    Ingest {
        /// Path to the experiences file
        file: PathBuf,

        /// Session the experiences belong to
        #[arg(short, long)]
        session: Option<String>,

        /// Recall this query after ingesting
        #[arg(short, long)]
        recall: Option<String>,

        /// Results to return for --recall (default: orchestrator.default_top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict --recall to one memory type
        #[arg(long)]
        memory_type: Option<MemoryType>,

        /// Run one consolidation pass after ingesting
        #[arg(long)]
        consolidate: bool,
    },

    /// Report engine and adapter health
    Health,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IngestItem {
    Text(String),
    Experience(Experience),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    mnemo_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::CheckConfig => cmd_check_config(&config),
        Commands::Ingest {
            file,
            session,
            recall,
            top_k,
            memory_type,
            consolidate,
        } => {
            let engine = build_engine(config).await?;
            let options = IngestOptions {
                session,
                recall,
                top_k,
                memory_type,
                consolidate,
            };
            cmd_ingest(&engine, &file, &options).await
        }
        Commands::Health => {
            let engine = build_engine(config).await?;
            cmd_health(&engine)
        }
    }
}

/// File config with environment overrides, or defaults with environment
/// overrides. Always validated.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let mut config = EngineConfig::default();
            config.apply_env_overrides();
            config.validate().context("Invalid default configuration")?;
            Ok(config)
        }
    }
}

async fn build_engine(config: EngineConfig) -> Result<MemoryEngine> {
    MemoryEngine::from_config(config, Arc::new(KeywordAnalyzer::new()))
        .await
        .context("Failed to start memory engine")
}

fn read_experiences(path: &Path) -> Result<Vec<Experience>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read experiences file: {}", path.display()))?;
    let items: Vec<IngestItem> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid experiences file: {}", path.display()))?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            IngestItem::Text(content) => Experience::new(content),
            IngestItem::Experience(experience) => experience,
        })
        .collect())
}

fn cmd_check_config(config: &EngineConfig) -> Result<()> {
    println!("Configuration OK");
    println!("  storage:   {}", config.storage.backend);
    println!("  graph:     {}", config.graph.backend);
    println!("  vector:    {}", config.vector.backend);
    println!("  analyzer:  {}", config.operation.analyzer);
    println!(
        "  limits:    {} concurrent ops, {}ms timeout",
        config.orchestrator.max_concurrent_operations, config.orchestrator.operation_timeout_ms
    );
    println!(
        "  cache:     {} entries, {}s ttl",
        config.cache.max_size, config.cache.ttl_secs
    );
    Ok(())
}

struct IngestOptions {
    session: Option<String>,
    recall: Option<String>,
    top_k: Option<usize>,
    memory_type: Option<MemoryType>,
    consolidate: bool,
}

/// Summary of one ingest run, kept for tests.
#[derive(Debug, Default)]
struct IngestSummary {
    retained: usize,
    distinct: usize,
    recalled: usize,
}

async fn cmd_ingest(engine: &MemoryEngine, file: &Path, options: &IngestOptions) -> Result<()> {
    let summary = ingest(engine, file, options).await?;
    info!(
        retained = summary.retained,
        distinct = summary.distinct,
        recalled = summary.recalled,
        "ingest finished"
    );
    engine.flush_metrics();
    Ok(())
}

async fn ingest(
    engine: &MemoryEngine,
    file: &Path,
    options: &IngestOptions,
) -> Result<IngestSummary> {
    let experiences = read_experiences(file)?;
    let context = options
        .session
        .as_deref()
        .map(Context::session)
        .unwrap_or_default();

    let mut summary = IngestSummary::default();
    let mut seen = std::collections::BTreeSet::new();
    for (idx, experience) in experiences.iter().enumerate() {
        let memory = engine
            .retain(experience, &context, None)
            .await
            .with_context(|| format!("Failed to retain experience #{}", idx + 1))?;
        println!("retained {} [{}] {}", memory.id, memory.memory_type, memory.content);
        summary.retained += 1;
        seen.insert(memory.id);
    }
    summary.distinct = seen.len();
    println!(
        "{} experiences -> {} memories",
        summary.retained, summary.distinct
    );

    if options.consolidate {
        let report = engine
            .consolidate_now()
            .await
            .context("Consolidation failed")?;
        println!(
            "consolidated: {} moved, {} merged, {} absorbed",
            report.moved.len(),
            report.merged.len(),
            report.absorbed.len()
        );
    }

    if let Some(query) = &options.recall {
        let top_k = options.top_k.unwrap_or_else(|| engine.default_top_k());
        let results = engine
            .recall(query, Some(&context), options.memory_type, top_k)
            .await
            .with_context(|| format!("Recall failed for query {query:?}"))?;
        println!("recall {query:?}: {} results", results.len());
        for (rank, hit) in results.iter().enumerate() {
            println!(
                "  {:>2}. {:.4} [{}] {}",
                rank + 1,
                hit.score,
                hit.memory.layer,
                hit.memory.content
            );
        }
        summary.recalled = results.len();
    }
    Ok(summary)
}

fn cmd_health(engine: &MemoryEngine) -> Result<()> {
    let report = engine.health_check();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
