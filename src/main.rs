//! Binary entry point for vectorbridge.
//!
//! Inspects configured stores and moves collections between them.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr/print_stdout in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use vectorbridge::VectorStoreManager;
use vectorbridge::config::VectorBridgeConfig;
use vectorbridge::observability::{self, ObservabilityConfig};

/// vectorbridge - pluggable vector storage with online migration.
#[derive(Parser)]
#[command(name = "vectorbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "VECTORBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Print Prometheus metrics to stderr before exiting.
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Check every configured store.
    Health,

    /// List the collections of a store.
    Collections {
        /// Store name.
        store: String,
    },

    /// Copy a collection from one store to another.
    Migrate {
        /// Source store name.
        source: String,

        /// Target store name.
        target: String,

        /// Collection to copy.
        collection: String,

        /// Collection name in the target (default: same name).
        #[arg(long)]
        target_name: Option<String>,

        /// Records per batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Skip the final count comparison.
        #[arg(long)]
        no_verify: bool,
    },

    /// Copy a collection from a primary store into replicas.
    Sync {
        /// Collection to copy.
        collection: String,

        /// Primary store name.
        primary: String,

        /// Replica store names.
        #[arg(required = true)]
        replicas: Vec<String>,
    },

    /// Run one query against several stores.
    Search {
        /// Collection to search.
        collection: String,

        /// Query vector (comma-separated).
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        vector: Vec<f32>,

        /// Stores to query (comma-separated).
        #[arg(long, value_delimiter = ',', required = true)]
        stores: Vec<String>,

        /// Maximum number of results per store.
        #[arg(long, default_value = "10")]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present (ignore errors)
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let observability = match observability::init(ObservabilityConfig::from_settings(
        Some(&config.observability),
        cli.verbose,
    )) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    let print_metrics = cli.print_metrics;
    let result = run_command(cli.command, &config).await;

    if print_metrics {
        match observability.render_metrics() {
            Some(text) => eprintln!("{text}"),
            None => eprintln!("Metrics are disabled; set VECTORBRIDGE_METRICS_ENABLED=true"),
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration from an explicit path or the default location.
fn load_config(path: Option<&PathBuf>) -> anyhow::Result<VectorBridgeConfig> {
    match path {
        Some(path) => VectorBridgeConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display())),
        None => Ok(VectorBridgeConfig::load_default()),
    }
}

/// Runs the selected command.
async fn run_command(command: Commands, config: &VectorBridgeConfig) -> anyhow::Result<()> {
    let manager = VectorStoreManager::from_config(config);
    let result = dispatch(command, &manager).await;
    manager.close_all().await;
    result
}

/// Formats a Unix timestamp as RFC 3339, or `-` when the engine reports none.
fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map_or_else(|| "-".to_string(), |dt| dt.to_rfc3339())
}

async fn dispatch(command: Commands, manager: &VectorStoreManager) -> anyhow::Result<()> {
    match command {
        Commands::Health => {
            let health = manager.get_all_health().await;
            if health.is_empty() {
                println!("No stores configured.");
                return Ok(());
            }
            for (name, status) in &health {
                let state = if status.healthy { "ok" } else { "FAILED" };
                print!("{name:<16} {:<14} {state:<7} {:>5}ms", status.backend, status.latency_ms);
                match (&status.error, status.collections) {
                    (Some(error), _) => println!("  {error}"),
                    (None, Some(n)) => println!("  {n} collection(s)"),
                    (None, None) => println!(),
                }
            }
            if health.values().any(|s| !s.healthy) {
                bail!("one or more stores are unhealthy");
            }
        },

        Commands::Collections { store } => {
            let store = manager.get_store(&store).await?;
            for name in store.list_collections().await? {
                match store.get_collection_info(&name).await? {
                    Some(info) => println!(
                        "{name:<24} dim={:<5} metric={:<9} count={:<8} updated={}",
                        info.dimension,
                        info.metric,
                        info.count,
                        format_timestamp(info.updated_at)
                    ),
                    None => println!("{name}"),
                }
            }
        },

        Commands::Migrate {
            source,
            target,
            collection,
            target_name,
            batch_size,
            no_verify,
        } => {
            let report = manager
                .migrate(
                    &source,
                    &target,
                    &collection,
                    target_name.as_deref(),
                    batch_size,
                    !no_verify,
                )
                .await
                .with_context(|| format!("migrating '{collection}' from {source} to {target}"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.verified == Some(false) {
                bail!(
                    "verification failed: source had {} records, target has {}",
                    report.source_count,
                    report.target_count.unwrap_or(0)
                );
            }
        },

        Commands::Sync {
            collection,
            primary,
            replicas,
        } => {
            let replicas: Vec<&str> = replicas.iter().map(String::as_str).collect();
            let counts = manager
                .sync_collections(&collection, &primary, &replicas)
                .await;
            for (replica, count) in &counts {
                if *count < 0 {
                    println!("{replica:<16} FAILED");
                } else {
                    println!("{replica:<16} {count} record(s)");
                }
            }
            if counts.values().any(|c| *c < 0) {
                bail!("sync failed for one or more replicas");
            }
        },

        Commands::Search {
            collection,
            vector,
            stores,
            top_k,
        } => {
            let stores: Vec<&str> = stores.iter().map(String::as_str).collect();
            let results = manager
                .search_all(&vector, &stores, top_k, &collection, None)
                .await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        },
    }
    Ok(())
}
