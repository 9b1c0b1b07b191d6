//! Mesh resilience CLI.
//!
//! ```text
//! mesh-resilience check <config.toml>
//!     → load + validate, print guarded dependencies as JSON
//!
//! mesh-resilience simulate --config <config.toml> --dependency <name>
//!     → drive synthetic flaky calls through the node, print outcomes
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use rand::Rng;
use serde_json::json;

use mesh_resilience::config::load_config;
use mesh_resilience::observability::{logging, metrics};
use mesh_resilience::{InvokeError, MeshNode};

#[derive(Parser)]
#[command(name = "mesh-resilience")]
#[command(about = "Inspect and exercise mesh node resilience settings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Check {
        /// Path to the TOML configuration
        config: PathBuf,
    },
    /// Run synthetic calls against one dependency
    Simulate {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        dependency: String,

        #[arg(long, default_value = "simulator")]
        caller: String,

        #[arg(long, default_value_t = 50)]
        calls: usize,

        /// Probability that a single attempt fails
        #[arg(long, default_value_t = 0.3)]
        failure_rate: f64,

        /// Simulated latency per attempt in milliseconds
        #[arg(long, default_value_t = 5)]
        latency_ms: u64,
    },
}

#[derive(Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
    rate_limited: usize,
    circuit_open: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let config = load_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&config.dependencies)?);
        }
        Commands::Simulate {
            config,
            dependency,
            caller,
            calls,
            failure_rate,
            latency_ms,
        } => {
            let config = load_config(&config)?;
            logging::init_logging(&config.observability);

            if config.observability.metrics_enabled {
                match config.observability.metrics_address.parse() {
                    Ok(addr) => metrics::init_metrics(addr),
                    Err(_) => tracing::error!(
                        metrics_address = %config.observability.metrics_address,
                        "Failed to parse metrics address"
                    ),
                }
            }

            let failure_rate = failure_rate.clamp(0.0, 1.0);
            let node = MeshNode::with_defaults(&config);
            tracing::info!(dependency = %dependency, calls, failure_rate, "Starting simulation");

            let outcomes = join_all((0..calls).map(|_| {
                node.invoke(&dependency, &caller, || async move {
                    tokio::time::sleep(Duration::from_millis(latency_ms)).await;
                    let failed = rand::thread_rng().gen_bool(failure_rate);
                    if failed {
                        Err("injected failure")
                    } else {
                        Ok(())
                    }
                })
            }))
            .await;

            let mut tally = Tally::default();
            for outcome in outcomes {
                match outcome {
                    Ok(()) => tally.succeeded += 1,
                    Err(InvokeError::RateLimited(_)) => tally.rate_limited += 1,
                    Err(InvokeError::CircuitOpen(_)) => tally.circuit_open += 1,
                    Err(InvokeError::UnknownDependency(name)) => {
                        return Err(format!("dependency '{}' is not configured", name).into());
                    }
                    Err(InvokeError::Action(_)) => tally.failed += 1,
                }
            }

            let summary = json!({
                "dependency": dependency,
                "succeeded": tally.succeeded,
                "failed": tally.failed,
                "rate_limited": tally.rate_limited,
                "circuit_open": tally.circuit_open,
                "breakers": node.snapshots(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
