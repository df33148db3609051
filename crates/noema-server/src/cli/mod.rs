pub mod backup;
pub mod config_cmd;
pub mod facts;
pub mod learn;
pub mod process;
pub mod rules;
pub mod stats;

use crate::config::NoemaConfig;
use clap::{Args, Parser, Subcommand};
use noema_core::{Engine, Fact};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "noema")]
#[command(version, about = "Hybrid knowledge & reasoning engine")]
pub struct Cli {
    /// Path to noema.toml
    #[arg(long, global = true, env = "NOEMA_CONFIG", default_value = "noema.toml")]
    pub config: PathBuf,

    /// Path to data directory (overrides config file)
    #[arg(long, global = true, env = "NOEMA_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// HTTP listen address (overrides config file)
    #[arg(long, global = true, env = "NOEMA_HTTP_ADDR")]
    pub http_addr: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server and background loops
    Serve,
    /// Run one request through the pipeline
    Process(ProcessArgs),
    /// List facts matching a pattern
    Query(QueryArgs),
    /// Assert a fact
    Assert(AssertArgs),
    /// Retract a fact by id
    Retract(RetractArgs),
    /// Record an interaction for later consolidation
    Learn(LearnArgs),
    /// Run one consolidation pass now
    Consolidate(FormatArgs),
    /// Take a snapshot of the store
    Backup,
    /// Restore the store from a snapshot
    Restore(RestoreArgs),
    /// List snapshots
    Snapshots(FormatArgs),
    /// Engine statistics
    Stats(FormatArgs),
    /// Rule file commands
    #[command(subcommand)]
    Rules(RulesCommands),
    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct FormatArgs {
    /// "table" or "json"
    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct ProcessArgs {
    pub text: String,
    /// neural, symbolic, hybrid or adaptive
    #[arg(long)]
    pub mode: Option<String>,
    /// Earlier turn, oldest first; repeatable
    #[arg(long)]
    pub context: Vec<String>,
    /// Print the reasoning trace
    #[arg(long)]
    pub explain: bool,
    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub predicate: Option<String>,
    #[arg(long)]
    pub object: Option<String>,
    /// Match the object as a literal value
    #[arg(long)]
    pub literal: bool,
    /// Include superseded and retracted facts
    #[arg(long)]
    pub all: bool,
    #[arg(long, default_value = "50")]
    pub limit: usize,
    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct AssertArgs {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[arg(long, default_value = "1.0")]
    pub confidence: f32,
}

#[derive(Args, Debug)]
pub struct RetractArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct LearnArgs {
    pub input: String,
    #[arg(long)]
    pub response: Option<String>,
    /// positive, neutral or negative
    #[arg(long, default_value = "neutral")]
    pub outcome: String,
    #[arg(long)]
    pub context: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Snapshot file to restore
    pub path: Option<PathBuf>,
    /// Restore the newest snapshot that verifies
    #[arg(long, conflicts_with = "path")]
    pub latest: bool,
    /// Skip the confirmation check
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum RulesCommands {
    /// Parse and validate a rule file
    Check(RulesCheckArgs),
}

#[derive(Args, Debug)]
pub struct RulesCheckArgs {
    pub file: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    Validate,
    Show,
}

/// Open the engine embedded in this process.
pub async fn open_engine(config: &NoemaConfig) -> anyhow::Result<Engine> {
    Engine::open(config.engine_config())
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to open store at {}: {}\nIs `noema serve` holding the database?",
                config.db_path().display(),
                e
            )
        })
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// --- Table printing helpers ---

pub fn print_fact_table(facts: &[Fact]) {
    if facts.is_empty() {
        println!("(no results)");
        return;
    }
    println!(
        "{:<32}  {:<20}  {:<16}  {:<20}  {:<5}  {}",
        "ID", "SUBJECT", "PREDICATE", "OBJECT", "CONF", "VER"
    );
    println!("{}", "─".repeat(110));
    for f in facts {
        println!(
            "{:<32}  {:<20}  {:<16}  {:<20}  {:<5.2}  {}",
            f.id.as_str(),
            truncate(&f.subject.to_string(), 20),
            truncate(&f.predicate, 16),
            truncate(&f.object.to_string(), 20),
            f.confidence,
            f.version
        );
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max - 1).collect::<String>())
    }
}
