//! # Review Harness CLI (`rvw`)
//!
//! The `rvw` binary is the primary interface for Review Harness. It provides
//! commands for database initialization, running analysis, inspecting the
//! result cache, and listing rules.
//!
//! ## Usage
//!
//! ```bash
//! rvw --config ./rvw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rvw init` | Create the SQLite database and run schema migrations |
//! | `rvw check [PATHS]...` | Analyze files and print findings, score, and gate |
//! | `rvw check --diff` | Analyze only files with local uncommitted changes |
//! | `rvw cache stats` | Show cache entry count and size |
//! | `rvw cache clear` | Delete all cached results |
//! | `rvw cache cost` | Summarize provider spend over a trailing window |
//! | `rvw cache logs` | Show recent provider calls |
//! | `rvw rules` | List the active rules |
//!
//! `rvw check` exits 1 when the gate fails, 0 when it passes, and 2 on
//! configuration or store errors.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use review_harness::config::{load_config, Config};
use review_harness::engine::Engine;
use review_harness::packs::PackRegistry;
use review_harness::progress::ProgressMode;
use review_harness::report;
use review_harness::store::ResultStore;

/// Review Harness CLI — a local-first LLM code review and quality gate
/// harness.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rvw.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rvw",
    about = "Review Harness — a local-first LLM code review and quality gate harness",
    version,
    long_about = "Review Harness analyzes source files with an LLM provider against composable \
    rule packs, caches results in an embedded SQLite store, and reduces findings into a \
    0-100 quality score and a pass/fail gate decision."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./rvw.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the cache and call-log tables,
    /// and runs pending schema migrations. Idempotent.
    Init,

    /// Analyze files and print findings, score, and gate decision.
    ///
    /// Cached results are reused for unchanged files; only cache misses
    /// are sent to the provider, up to the configured call ceiling.
    Check {
        /// Files or directories to analyze. Defaults to the current directory.
        paths: Vec<PathBuf>,

        /// Only analyze files with local uncommitted changes (plus untracked files).
        #[arg(long)]
        diff: bool,

        /// Keep only findings whose rule id contains one of these values.
        #[arg(long, value_delimiter = ',')]
        rules: Vec<String>,

        /// Output format: text or json.
        #[arg(long, default_value = "text")]
        format: String,

        /// Progress reporting on stderr: off, human, or json.
        /// Defaults to human when stderr is a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Inspect or maintain the result cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// List the active rules.
    Rules {
        /// List a single pack instead of the configured composition.
        #[arg(long)]
        pack: Option<String>,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache entry count and database size.
    Stats,
    /// Delete all cached results (call logs are kept).
    Clear,
    /// Summarize provider spend over a trailing window.
    Cost {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Show recent provider calls, most recent first.
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => cmd_init(&config).await.map(|_| 0),
        Commands::Check {
            paths,
            diff,
            rules,
            format,
            progress,
        } => cmd_check(config, paths, diff, rules, &format, progress.as_deref()).await,
        Commands::Cache { command } => cmd_cache(&config, command).await.map(|_| 0),
        Commands::Rules { pack } => cmd_rules(&config, pack.as_deref()).map(|_| 0),
    }
}

async fn cmd_init(config: &Config) -> Result<()> {
    let store = ResultStore::open(config).await?;
    store.close().await;
    println!("Database initialized at {}", config.db.path.display());
    Ok(())
}

async fn cmd_check(
    config: Config,
    paths: Vec<PathBuf>,
    diff: bool,
    rules: Vec<String>,
    format: &str,
    progress: Option<&str>,
) -> Result<i32> {
    let mode = match progress {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("Unknown progress mode: '{}'. Must be off, human, or json.", other),
    };
    let reporter = mode.reporter();

    let paths = if paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        paths
    };
    let rule_filter = if rules.is_empty() {
        None
    } else {
        Some(rules.as_slice())
    };

    let engine = Engine::from_config(config).await?;
    let result = engine
        .analyze(&paths, rule_filter, reporter.as_ref(), diff)
        .await?;

    match format {
        "text" => print!("{}", report::render_text(&result)),
        "json" => println!("{}", report::render_json(&result)?),
        other => bail!("Unknown output format: '{}'. Must be text or json.", other),
    }

    Ok(if result.gate_passed { 0 } else { 1 })
}

async fn cmd_cache(config: &Config, command: CacheCommands) -> Result<()> {
    let store = ResultStore::open(config).await?;

    match command {
        CacheCommands::Stats => {
            let stats = store.stats().await?;
            println!("Cache entries: {}", stats.entries);
            println!("Database size: {}", format_bytes(stats.size_bytes));
        }
        CacheCommands::Clear => {
            let removed = store.clear().await?;
            println!("Removed {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
        }
        CacheCommands::Cost { days } => {
            let summary = store.cost_summary(days).await?;
            println!("Provider usage over the last {} day(s):", days);
            println!("  Calls:    {}", summary.total_calls);
            println!("  Tokens:   {}", summary.total_tokens);
            println!("  Cost:     ${:.4}", summary.total_cost);
            println!("  Findings: {}", summary.total_findings);
        }
        CacheCommands::Logs { limit } => {
            let logs = store.call_logs(limit).await?;
            if logs.is_empty() {
                println!("No provider calls logged.");
            } else {
                println!(
                    "{:<12} {:<24} {:>8} {:>8} {:>10} {:>8}",
                    "PACK", "MODEL", "TOKENS", "COST", "DURATION", "FOUND"
                );
                for log in logs {
                    println!(
                        "{:<12} {:<24} {:>8} {:>8} {:>8}ms {:>8}",
                        log.pack,
                        log.model,
                        log.total_tokens,
                        format!("${:.4}", log.cost_usd),
                        log.duration_ms,
                        log.findings_found
                    );
                }
            }
        }
    }

    store.close().await;
    Ok(())
}

fn cmd_rules(config: &Config, pack: Option<&str>) -> Result<()> {
    let mut registry = PackRegistry::builtin();
    if let Some(dir) = &config.packs.custom_rules_dir {
        registry.register_custom_rules(dir)?;
    }

    let (label, rules) = match pack {
        Some(name) => {
            let source = registry.get(name)?;
            (format!("{}@{}", source.name, source.version), source.rules.clone())
        }
        None => {
            let composed = registry.compose(&config.packs.enabled)?;
            (composed.version.clone(), composed.rules().to_vec())
        }
    };

    println!("Rules ({}):\n", label);
    for rule in &rules {
        println!("  {:<32} [{}] {}", rule.id, rule.severity, rule.name);
    }
    println!("\n{} rule(s)", rules.len());
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
