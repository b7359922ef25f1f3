//! QCBridge CLI
//!
//! The `qcbridge` command drives an installed engine from the terminal.
//!
//! ## Commands
//!
//! - `run`: execute one computation request and print the canonical result
//! - `version`: resolve and print the installed engine version

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

use qcbridge_core::{init_tracing, ComputationRequest, EngineHarness, TaskConfig};

#[derive(Parser)]
#[command(name = "qcbridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive an installed Psi4 engine from QCSchema requests", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one computation request and print the canonical result
    Run {
        /// Path to the request file (JSON, canonical request schema)
        #[arg(short, long)]
        input: PathBuf,

        /// Core count handed to the engine
        #[arg(long, default_value = "1")]
        ncores: usize,

        /// Memory budget in gigabytes
        #[arg(long, default_value = "1.0")]
        memory: f64,

        /// Explicit scratch root (falls back to $PSI_SCRATCH, then temp)
        #[arg(long)]
        scratch: Option<PathBuf>,
    },

    /// Resolve and print the installed engine version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            input,
            ncores,
            memory,
            scratch,
        } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("reading request file {}", input.display()))?;
            let request: ComputationRequest =
                serde_json::from_str(&text).context("parsing computation request")?;
            let config = TaskConfig {
                ncores,
                memory_gb: memory,
                scratch_directory: scratch,
            };

            let harness = EngineHarness::new();
            match harness.compute(&request, &config).await {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(())
                }
                Err(err) => {
                    let report = serde_json::json!({
                        "success": false,
                        "error": err.to_string(),
                        "retryable": err.retryable(),
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    std::process::exit(1);
                }
            }
        }
        Commands::Version => {
            let harness = EngineHarness::new();
            let version = harness.get_version().await.context("resolving engine")?;
            println!("{version}");
            Ok(())
        }
    }
}
