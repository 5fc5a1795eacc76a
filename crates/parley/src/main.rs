// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - operator tool for the pending-task engine.
//!
//! Inspects and repairs the per-conversation snapshots the engine persists,
//! and prints the effective configuration.

mod snapshots;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use parley_config::model::ParleyConfig;
use parley_core::types::ConversationId;
use parley_core::ParleyError;
use parley_storage::SqliteStore;
use parley_sync::PersistenceGateway;

/// Parley - operator tool for the pending-task engine.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the search path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect or reset persisted snapshots.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Clear sending snapshots older than the staleness TTL.
    Sweep {
        /// Conversations to sweep.
        conversations: Vec<String>,
        /// Sweep every conversation with a stored snapshot.
        #[arg(long, conflicts_with = "conversations")]
        all: bool,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Subcommand, Debug)]
enum SnapshotAction {
    /// Print one conversation's snapshot.
    Show {
        conversation: String,
        /// Print the stored JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
    /// Reset one conversation to idle.
    Clear { conversation: String },
    /// List conversations with a stored snapshot.
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => parley_config::load_and_validate_path(path),
        None => parley_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            parley_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log.level);

    if let Err(e) = run(cli.command, &config).await {
        eprintln!("parley: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &ParleyConfig) -> Result<(), ParleyError> {
    if let Commands::Config = command {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| ParleyError::Config(format!("failed to render configuration: {e}")))?;
        print!("{rendered}");
        return Ok(());
    }

    let store = Arc::new(SqliteStore::open(&config.storage).await?);
    let namespace = config.sync.storage_namespace.clone();
    let gateway = PersistenceGateway::new(store.clone(), namespace.clone());

    match command {
        Commands::Snapshot { action } => match action {
            SnapshotAction::Show { conversation, json } => {
                let snapshot = gateway.load(&ConversationId::from(conversation)).await;
                if json {
                    println!("{}", snapshots::to_json(&snapshot)?);
                } else {
                    print!("{}", snapshots::describe(&snapshot, chrono::Utc::now()));
                }
            }
            SnapshotAction::Clear { conversation } => {
                let conversation = ConversationId::from(conversation);
                gateway.clear(&conversation).await;
                println!("{conversation}: cleared");
            }
            SnapshotAction::List => {
                for key in store.keys_with_prefix(&namespace).await? {
                    println!("{}", key.strip_prefix(namespace.as_str()).unwrap_or(&key));
                }
            }
        },
        Commands::Sweep { conversations, all } => {
            let targets: Vec<ConversationId> = if all {
                store
                    .keys_with_prefix(&namespace)
                    .await?
                    .iter()
                    .filter_map(|key| key.strip_prefix(namespace.as_str()))
                    .map(ConversationId::from)
                    .collect()
            } else {
                conversations.into_iter().map(ConversationId::from).collect()
            };
            let ttl = snapshots::ttl(&config.sync);
            for conversation in targets {
                let outcome =
                    snapshots::sweep(&gateway, &conversation, ttl, chrono::Utc::now()).await;
                println!("{conversation}: {outcome}");
            }
        }
        Commands::Config => {}
    }
    Ok(())
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
