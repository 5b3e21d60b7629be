//! microbit-sandbox: run learner programs on a simulated board
//!
//! ## Features
//!
//! - **run**: execute a program in the isolated worker, streaming its output
//!   and board events, then print the final board snapshot
//! - **transform**: show how a program is rewritten before it runs
//! - **state**: print the power-on board snapshot
//!
//! ## Example Usage
//!
//! ```bash
//! # Run a program for two seconds, pressing button A after half a second
//! microbit-sandbox run blink.py --duration-ms 2000 --press A@500
//!
//! # Show the awaits the transformer inserts
//! microbit-sandbox transform blink.py
//!
//! # Dump the reset board as JSON
//! microbit-sandbox state --json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod sandbox_cli;

use sandbox_cli::{run::RunCmd, state::StateCmd, transform::TransformCmd};

#[derive(Parser)]
#[command(
    name = "microbit-sandbox",
    author,
    version,
    about = "Simulated micro:bit-style board",
    long_about = "Runs programs written against the micro:bit-style hardware API on a \
                  simulated board in an isolated worker thread."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Simulator config file (default: $MICROBIT_SANDBOX_HOME/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (debug logging, audio commands)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program on the simulated board
    Run(RunCmd),

    /// Print the transformed program
    Transform(TransformCmd),

    /// Print the power-on board state
    State(StateCmd),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        command,
        config,
        json,
        verbose,
    } = Cli::parse();
    init_logging(verbose);

    match command {
        Commands::Run(cmd) => {
            let config = sandbox_cli::home::load_config(config.as_deref())?;
            cmd.execute(config, json, verbose).await
        }
        Commands::Transform(cmd) => cmd.execute(json),
        Commands::State(cmd) => {
            let config = sandbox_cli::home::load_config(config.as_deref())?;
            cmd.execute(config, json).await
        }
    }
}
