//! Warden CLI - record, query and prune audit events.
//!
//! Every command opens the persistent store, runs, then drains pending
//! writes before exiting.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_audit::AuditStore;
use warden_config::{Config, ResolvedConfig};
use warden_storage::{KvStore, SurrealKvStore};

mod commands;
mod config_bridge;
mod formatter;
mod theme;

use commands::audit::{self, LogArgs, QueryArgs};
use formatter::OutputFormat;
use theme::Theme;

/// Warden - audit event store
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format: pretty (default) or json
    #[arg(long, global = true, default_value = "pretty")]
    format: String,

    /// Path to an extra configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store directory (overrides `storage.path`)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an audit event
    Log {
        /// Category (auth, user, data, config, system, security, access, export, import)
        category: String,
        /// Action (login, create, update, ...)
        action: String,
        /// Acting user id
        #[arg(long)]
        user: Option<String>,
        /// Acting user's display name
        #[arg(long)]
        username: Option<String>,
        /// Client IP address
        #[arg(long)]
        ip: Option<String>,
        /// Resource kind
        #[arg(long, requires = "resource_id")]
        resource: Option<String>,
        /// Resource identifier
        #[arg(long, requires = "resource")]
        resource_id: Option<String>,
        /// Detail as key=value (repeatable)
        #[arg(short, long = "detail")]
        details: Vec<String>,
        /// Mark the action as failed with this message
        #[arg(long)]
        failed: Option<String>,
    },

    /// Show one audit record
    Get {
        /// Record id
        id: String,
    },

    /// Search audit records
    Query {
        /// Acting user id
        #[arg(long)]
        user: Option<String>,
        /// Acting user's display name
        #[arg(long)]
        username: Option<String>,
        /// Category
        #[arg(long)]
        category: Option<String>,
        /// Action
        #[arg(long)]
        action: Option<String>,
        /// Resource kind
        #[arg(long, requires = "resource_id")]
        resource: Option<String>,
        /// Resource identifier
        #[arg(long, requires = "resource")]
        resource_id: Option<String>,
        /// Only successful (true) or failed (false) actions
        #[arg(long)]
        success: Option<bool>,
        /// Client IP address
        #[arg(long)]
        ip: Option<String>,
        /// Earliest timestamp, RFC 3339, inclusive
        #[arg(long)]
        since: Option<String>,
        /// Latest timestamp, RFC 3339, inclusive
        #[arg(long)]
        until: Option<String>,
        /// Page size
        #[arg(long, default_value_t = warden_audit::DEFAULT_QUERY_LIMIT)]
        limit: usize,
        /// Matching records to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Oldest records first
        #[arg(long)]
        oldest_first: bool,
    },

    /// Show aggregate statistics
    Stats,

    /// Apply the retention policy
    Prune {
        /// Keep running and prune every `retention.interval_secs`
        #[arg(long)]
        watch: bool,
    },

    /// Delete one audit record
    Delete {
        /// Record id
        id: String,
    },

    /// Recompute aggregate statistics from the stored records
    RebuildStats,

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output_format = OutputFormat::parse(&cli.format);

    let resolved = match Config::load(cli.config.as_deref()) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("{}", Theme::error(&format!("Invalid configuration: {e}")));
            return Err(e.into());
        },
    };

    let mut log_config = config_bridge::to_log_config(&resolved.config)?;
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    let _log_guard = match warden_telemetry::setup_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        },
    };

    if let Commands::Config {
        command: ConfigCommands::Show,
    } = &cli.command
    {
        return commands::config::show_config(&resolved, output_format);
    }

    let path = match cli.store.clone() {
        Some(path) => path,
        None => config_bridge::storage_path(&resolved.config)?,
    };
    let kv = Arc::new(
        SurrealKvStore::open(&path)
            .with_context(|| format!("failed to open audit store at {}", path.display()))?,
    );
    info!(path = %path.display(), "Opened audit store");

    let store = build_store(&resolved, Arc::clone(&kv) as Arc<dyn KvStore>);
    let result = run(&store, &resolved, cli.command, output_format).await;

    if let Err(e) = store.shutdown().await {
        warn!(error = %e, "Pending audit writes failed during shutdown");
    }
    kv.close().await?;
    result
}

fn build_store(resolved: &ResolvedConfig, kv: Arc<dyn KvStore>) -> AuditStore {
    let cfg = &resolved.config;
    AuditStore::builder(kv)
        .batch_mode(config_bridge::to_batch_mode(cfg))
        .queue_capacity(cfg.writes.queue_capacity)
        .redaction(config_bridge::to_redaction_policy(cfg))
        .contention(config_bridge::to_contention_policy(cfg))
        .retention(config_bridge::to_retention_policy(cfg))
        .build()
}

async fn run(
    store: &AuditStore,
    resolved: &ResolvedConfig,
    command: Commands,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Commands::Log {
            category,
            action,
            user,
            username,
            ip,
            resource,
            resource_id,
            details,
            failed,
        } => {
            let args = LogArgs {
                category,
                action,
                user,
                username,
                ip,
                resource,
                resource_id,
                details,
                failed,
            };
            audit::log_event(store, args, format).await
        },
        Commands::Get { id } => audit::show_record(store, &id, format).await,
        Commands::Query {
            user,
            username,
            category,
            action,
            resource,
            resource_id,
            success,
            ip,
            since,
            until,
            limit,
            offset,
            oldest_first,
        } => {
            let args = QueryArgs {
                user,
                username,
                category,
                action,
                resource,
                resource_id,
                success,
                ip,
                since,
                until,
                limit,
                offset,
                oldest_first,
            };
            audit::run_query(store, args, format).await
        },
        Commands::Stats => audit::show_stats(store, format).await,
        Commands::Prune { watch: false } => audit::prune(store, format).await,
        Commands::Prune { watch: true } => watch_retention(store, resolved).await,
        Commands::Delete { id } => audit::delete(store, &id, format).await,
        Commands::RebuildStats => audit::rebuild_stats(store, format).await,
        Commands::Config { .. } => Ok(()),
    }
}

async fn watch_retention(store: &AuditStore, resolved: &ResolvedConfig) -> Result<()> {
    let interval = Duration::from_secs(resolved.config.retention.interval_secs);
    let cancel = CancellationToken::new();
    let handle = store.spawn_retention(interval, cancel.clone());
    println!(
        "{}",
        Theme::info(&format!(
            "Pruning every {}s, press Ctrl-C to stop",
            interval.as_secs()
        ))
    );

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    handle.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_command_parses() {
        let cli = Cli::parse_from([
            "warden", "log", "auth", "login", "--user", "u1", "-d", "attempt=2",
        ]);
        match cli.command {
            Commands::Log { user, details, .. } => {
                assert_eq!(user.as_deref(), Some("u1"));
                assert_eq!(details, vec!["attempt=2"]);
            },
            _ => panic!("expected log command"),
        }
    }

    #[tokio::test]
    async fn test_store_built_from_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(SurrealKvStore::open(dir.path()).unwrap());
        let mut config = Config::default();
        config.writes.mode = "sync".into();
        let resolved = ResolvedConfig {
            config,
            loaded_files: Vec::new(),
            env_overrides: Vec::new(),
        };

        let store = build_store(&resolved, Arc::clone(&kv) as Arc<dyn KvStore>);
        let event = audit::build_event(LogArgs {
            category: "auth".into(),
            action: "login".into(),
            details: vec!["password=hunter2".into()],
            ..LogArgs::default()
        })
        .unwrap();
        let id = store.log(event).await.unwrap();

        let record = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.details["password"], "[REDACTED]");
        store.shutdown().await.unwrap();
        kv.close().await.unwrap();
    }
}
