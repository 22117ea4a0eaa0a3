//! # Queue-Drain CLI
//!
//! Command-line interface for reading and deleting messages from an Azure
//! Storage Queue.
//!
//! This module provides CLI commands for:
//! - Draining a queue: print every received message and delete it
//! - Sending messages to a queue, optionally creating it first
//!
//! Message output goes to stdout; logs go to stderr.

pub mod config;

use crate::config::{AppConfig, ConfigError, LogFormat};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use queue_drain_runtime::{
    drain_queue, DrainError, DrainOptions, MessageEncoding, QueueClient, QueueClientFactory,
    QueueError, SendOptions,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Longest message time-to-live accepted by `send --ttl`
pub const MAX_MESSAGE_TTL_SECONDS: u64 = 604_800;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue-Drain CLI - Read and delete messages from Azure Storage Queues
#[derive(Parser)]
#[command(name = "queue-drain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Read and delete messages from an Azure Storage Queue")]
#[command(
    long_about = "Queue-Drain receives a batch of messages from an Azure Storage Queue, prints each message and deletes it using the receipt issued with that delivery"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_DRAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage account connection string
    #[arg(
        long,
        env = "AZURE_STORAGE_CONNECTION_STRING",
        hide_env_values = true
    )]
    pub connection_string: Option<String>,

    /// Logging level (overrides configuration)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Receive messages, print their content and delete them
    Drain {
        /// Queue name
        #[arg(short, long)]
        queue: Option<String>,

        /// Maximum messages per receive call (1-32)
        #[arg(short, long)]
        batch_size: Option<u32>,

        /// Seconds received messages stay hidden from other consumers
        #[arg(long)]
        visibility_timeout: Option<u64>,

        /// Keep receiving until a batch comes back empty
        #[arg(long)]
        until_empty: bool,

        /// Maximum number of batches with --until-empty
        #[arg(long)]
        max_batches: Option<u32>,

        /// Message encoding used in the queue
        #[arg(short, long)]
        encoding: Option<MessageEncoding>,
    },

    /// Put messages on a queue
    Send {
        /// Queue name
        #[arg(short, long)]
        queue: Option<String>,

        /// Create the queue if it does not exist
        #[arg(long)]
        create_queue: bool,

        /// Message encoding used in the queue
        #[arg(short, long)]
        encoding: Option<MessageEncoding>,

        /// Seconds before the service discards the message (1-604800)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_MESSAGE_TTL_SECONDS))]
        ttl: Option<u64>,

        /// Message text, one message per argument
        #[arg(required = true)]
        messages: Vec<String>,
    },
}

// ============================================================================
// Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DrainError> for CliError {
    fn from(e: DrainError) -> Self {
        match e {
            DrainError::Queue(e) => Self::Queue(e),
            DrainError::Output(e) => Self::Io(e),
        }
    }
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(e) => match e {
                QueueError::ConfigurationError(_) | QueueError::ValidationError(_) => 1,
                QueueError::AuthenticationFailed { .. } => 2,
                QueueError::QueueNotFound { .. } => 3,
                QueueError::ConnectionFailed { .. } | QueueError::Timeout { .. } => 4,
                e if e.is_transient() => 4,
                _ => 5,
            },
            Self::Io(_) => 6,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = resolve_config(&cli)?;
    initialize_logging(&config.logging.level, config.logging.format)?;

    let stdout = std::io::stdout();
    execute(cli.command, config, &mut stdout.lock()).await
}

/// Load configuration and apply command-line overrides
pub fn resolve_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

/// Apply flags given on the command line on top of loaded configuration
pub fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(connection_string) = &cli.connection_string {
        config.connection_string = Some(connection_string.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.format = LogFormat::Json;
    }

    match &cli.command {
        Commands::Drain {
            queue,
            batch_size,
            visibility_timeout,
            until_empty,
            max_batches,
            encoding,
        } => {
            if let Some(queue) = queue {
                config.queue_name = queue.clone();
            }
            if let Some(batch_size) = batch_size {
                config.drain.batch_size = *batch_size;
            }
            if let Some(seconds) = visibility_timeout {
                config.drain.visibility_timeout_seconds = Some(*seconds);
            }
            if *until_empty {
                config.drain.until_empty = true;
            }
            if let Some(max_batches) = max_batches {
                config.drain.max_batches = *max_batches;
            }
            if let Some(encoding) = encoding {
                config.encoding = *encoding;
            }
        }
        Commands::Send {
            queue, encoding, ..
        } => {
            if let Some(queue) = queue {
                config.queue_name = queue.clone();
            }
            if let Some(encoding) = encoding {
                config.encoding = *encoding;
            }
        }
    }
}

/// Initialize logging to stderr
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn initialize_logging(level: &str, format: LogFormat) -> Result<(), ConfigError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .map_err(|e| ConfigError::InvalidValue {
            key: "logging.level".to_string(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.map_err(|e| ConfigError::InvalidValue {
        key: "logging".to_string(),
        message: e.to_string(),
    })
}

/// Execute a command against the queue described by `config`
pub async fn execute<W: Write>(
    command: Commands,
    config: AppConfig,
    out: &mut W,
) -> Result<(), CliError> {
    let client = QueueClientFactory::create_client(config.queue_config()?).await?;

    match command {
        Commands::Drain { .. } => execute_drain_command(client.as_ref(), &config, out).await,
        Commands::Send {
            create_queue,
            ttl,
            messages,
            ..
        } => execute_send_command(client.as_ref(), &config, create_queue, ttl, messages, out).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute drain command
#[instrument(skip_all, fields(queue = %config.queue_name))]
async fn execute_drain_command<W: Write>(
    client: &dyn QueueClient,
    config: &AppConfig,
    out: &mut W,
) -> Result<(), CliError> {
    let queue = config.queue_name()?;
    let options = DrainOptions {
        batch_size: config.drain.batch_size,
        visibility_timeout: config.visibility_timeout(),
        until_empty: config.drain.until_empty,
        max_batches: config.drain.max_batches,
    };

    info!(
        batch_size = options.batch_size,
        until_empty = options.until_empty,
        encoding = ?config.encoding,
        "Draining queue"
    );

    drain_queue(client, &queue, &options, out).await?;
    Ok(())
}

/// Execute send command
#[instrument(skip_all, fields(queue = %config.queue_name, count = messages.len()))]
async fn execute_send_command<W: Write>(
    client: &dyn QueueClient,
    config: &AppConfig,
    create_queue: bool,
    ttl: Option<u64>,
    messages: Vec<String>,
    out: &mut W,
) -> Result<(), CliError> {
    let queue = config.queue_name()?;
    let ttl = message_ttl(ttl)?;
    info!("Queue client created");

    if create_queue {
        let created = client.create_queue(&queue).await?;
        info!(created = created, "Ensured queue exists");
    }

    let mut options = SendOptions::new();
    if let Some(ttl) = ttl {
        options = options.with_time_to_live(ttl);
    }

    for message in messages {
        let message_id = client
            .send_message(&queue, Bytes::from(message.clone()), options.clone())
            .await?;
        writeln!(out, "Message sent: {}", message)?;
        info!(message_id = %message_id, "Message sent");
    }

    out.flush()?;
    Ok(())
}

/// Convert a `--ttl` value to a duration, rejecting values outside
/// 1..=[`MAX_MESSAGE_TTL_SECONDS`]
pub fn message_ttl(seconds: Option<u64>) -> Result<Option<chrono::Duration>, ConfigError> {
    let Some(seconds) = seconds else {
        return Ok(None);
    };

    let invalid = || ConfigError::InvalidValue {
        key: "ttl".to_string(),
        message: format!(
            "must be between 1 and {} seconds, got {}",
            MAX_MESSAGE_TTL_SECONDS, seconds
        ),
    };

    if seconds == 0 || seconds > MAX_MESSAGE_TTL_SECONDS {
        return Err(invalid());
    }
    let seconds = i64::try_from(seconds).map_err(|_| invalid())?;

    Ok(Some(chrono::Duration::seconds(seconds)))
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
