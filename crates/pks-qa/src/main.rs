//! # PKS Q&A CLI (`pks-qa`)
//!
//! ## Usage
//!
//! ```bash
//! pks-qa --config ./config/pks-qa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pks-qa ask [QUESTION]` | Answer one question, or prompt until a blank line |
//! | `pks-qa serve` | Serve the question page and JSON API |
//! | `pks-qa inspect <FILE>` | Summarize a local index artifact |
//!
//! Logs go to stderr; set `RUST_LOG` or pass `-v` for more detail.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pks_qa::{ask, config, inspect, server, service};

#[derive(Parser)]
#[command(
    name = "pks-qa",
    about = "Ask questions against a prebuilt semantic index stored in Google Drive",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pks-qa.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question, or start an interactive prompt when none is given.
    Ask {
        question: Option<String>,
    },

    /// Start the HTTP server.
    ///
    /// Loads the index and embedding model first, then binds to
    /// `[server].bind`.
    Serve,

    /// Decode a local artifact file and print its summary.
    ///
    /// Does not read the config file.
    Inspect {
        path: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Inspect { path } = &cli.command {
        return inspect::run_inspect(path);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ask { question } => {
            ask::run_ask(&cfg, question).await?;
        }
        Commands::Serve => {
            let service = service::start(&cfg).await?;
            server::run_server(&cfg, service).await?;
        }
        Commands::Inspect { .. } => {}
    }

    Ok(())
}
