//! qpolicy Command-Line Interface
//!
//! Evaluates trained variational quantum policies against replayed
//! observation traces on calibration-aware backends.
//!
//! ```text
//!   observation ─► circuit ─► backend ─► counts ─► action
//!                               ▲
//!                          calibration
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::evaluate::EvaluateArgs;
use commands::init::InitArgs;
use commands::{backends, calibration, evaluate, init, inspect, version};

/// qpolicy - calibration-aware evaluation of quantum RL policies
#[derive(Parser)]
#[command(name = "qpolicy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a policy artifact over a replayed observation trace
    Evaluate(EvaluateArgs),

    /// Show the hyperparameters and fingerprint of a policy artifact
    Inspect {
        /// Policy artifact (JSON)
        artifact: PathBuf,

        /// Print the artifact summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a fresh policy artifact
    Init(InitArgs),

    /// Fetch one calibration snapshot from a backend and print it
    Calibration {
        /// Backend to query
        #[arg(short, long, default_value = "simulator")]
        backend: String,

        /// Device description file for the simulator
        #[arg(long)]
        device_file: Option<PathBuf>,

        /// Sampling seed
        #[arg(long)]
        seed: Option<u64>,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available backends
    Backends,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("QPOLICY_LOG").unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Evaluate(args) => evaluate::execute(&args).await,

        Commands::Inspect { artifact, json } => inspect::execute(&artifact, json),

        Commands::Init(args) => init::execute(&args),

        Commands::Calibration {
            backend,
            device_file,
            seed,
            json,
        } => calibration::execute(&backend, device_file.as_deref(), seed, json).await,

        Commands::Backends => backends::execute(),

        Commands::Version => {
            version::execute();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
