//! # chatsync CLI
//!
//! Inspect the local replica of a chatsync account.
//!
//! ## Commands
//!
//! - `status`: Show cursor, orderings and upload jobs
//! - `conversations`: Page the conversation list, most recent first
//! - `history`: Page the events of one conversation
//!
//! ## Example
//!
//! ```bash
//! # Summary of the replica
//! chatsync --database alice.db status
//!
//! # First page of conversations, without contacting the server
//! chatsync --mock conversations
//!
//! # Older messages of one conversation
//! chatsync history <first-user>+<second-user> --before 1700000000000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use chatsync_types::ConversationId;

mod commands;
mod config;

use commands::{conversations, history, status, Replica};

/// Inspect the local replica of a chatsync account.
#[derive(Parser, Debug)]
#[command(name = "chatsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./chatsync.toml if present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Replica database, overriding the configuration
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Bearer token for the remote event log
    #[arg(long, global = true)]
    token: Option<String>,

    /// Use an empty in-memory remote instead of the HTTP API
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show cursor, orderings and upload jobs
    Status,

    /// Page the conversation list, most recent first
    Conversations {
        /// Start after this conversation
        #[arg(long)]
        anchor: Option<String>,
    },

    /// Page the events of one conversation, newest first
    History {
        /// Conversation id (`<user>+<user>`)
        conversation: String,

        /// Only events received before this time (ms since epoch)
        #[arg(long)]
        before: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.storage.database = database;
    }

    let replica = Replica::open(&config, cli.mock, cli.token)
        .await
        .context("Failed to open replica")?;
    tracing::debug!(location = %replica.location, mock = cli.mock, "replica opened");

    match cli.command {
        Commands::Status => {
            status::run(&replica).await?;
        }
        Commands::Conversations { anchor } => {
            let anchor = anchor
                .map(|a| a.parse::<ConversationId>())
                .transpose()
                .context("Invalid anchor conversation id")?;
            conversations::run(&replica, anchor).await?;
        }
        Commands::History {
            conversation,
            before,
        } => {
            let conversation = conversation
                .parse::<ConversationId>()
                .context("Invalid conversation id")?;
            history::run(&replica, conversation, before).await?;
        }
    }

    Ok(())
}
