//! pstored: pointstore storage node daemon
//!
//! Usage:
//!   pstored [--config /etc/pstore/config.toml] [run]
//!   pstored put <FILE> [--wait]
//!   pstored get <FILE_ID> <DEST>
//!
//! `run` (the default) recovers interrupted chunk operations, then keeps the
//! upload scheduler and the metrics endpoint running until SIGINT/SIGTERM.

mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use pstore_core::config::PstoreConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pstored", version, about = "pointstore storage node daemon")]
struct Cli {
    /// Path to the pstore.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PSTORE_CONFIG",
        default_value = "/etc/pstore/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PSTORE_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "PSTORE_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node until signalled (default)
    Run,
    /// Store a file and print its file id
    Put {
        path: PathBuf,
        /// Publish every staged chunk before exiting
        #[arg(long)]
        wait: bool,
    },
    /// Restore a stored file by id
    Get { file_id: String, dest: PathBuf },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "pstored starting"
    );

    let config = PstoreConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => daemon::run(config).await,
        Command::Put { path, wait } => {
            let file_id = daemon::put(config, &path, wait).await?;
            println!("{file_id}");
            Ok(())
        }
        Command::Get { file_id, dest } => daemon::get(config, &file_id, &dest).await,
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
