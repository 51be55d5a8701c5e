//! CLI Entry Point for rf_bench
//!
//! Runs bench operations against simulated instruments:
//! - Instrument discovery and status
//! - Device check and calibration
//! - Full measurement runs, printed as JSON
//! - Secondary parameter inspection and editing
//! - Listing of known devices and their primary parameters
//!
//! # Usage
//!
//! ```bash
//! rf_bench measure --device receiver
//! rf_bench params set f_min 2.5
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rf_bench::calibration::CalibrationStage;
use rf_bench::config::{BenchConfig, DEFAULT_CONFIG_PATH};
use rf_bench::hardware::InstrumentRegistry;
use rf_bench::{logging, BenchEvent, Orchestrator, Token};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "rf_bench")]
#[command(about = "RF device-characterization bench (simulated instruments)", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover instruments and print their status
    Status,

    /// Reset both instruments and report device presence
    Check {
        /// Device under test
        #[arg(long, default_value = "receiver")]
        device: String,
    },

    /// Run calibration (every stage unless one is named)
    Calibrate {
        /// Device under test
        #[arg(long, default_value = "receiver")]
        device: String,

        /// Single stage to run: lo, rf or mod
        #[arg(long)]
        stage: Option<String>,
    },

    /// Run a measurement and print the result as JSON
    Measure {
        /// Device under test
        #[arg(long, default_value = "receiver")]
        device: String,

        /// Correlation token echoed in events
        #[arg(long)]
        token: Option<String>,
    },

    /// List known devices with their primary parameters
    Devices,

    /// Show or edit secondary parameters
    Params {
        #[command(subcommand)]
        action: ParamsAction,
    },
}

#[derive(Subcommand)]
enum ParamsAction {
    /// Print every parameter with its range
    Show,

    /// Change a parameter and save the parameter file
    Set {
        /// Parameter name
        name: String,
        /// New value
        value: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BenchConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config).context("installing log subscriber")?;
    info!(app = %config.application.name, "starting");

    let bench = Orchestrator::from_config(&config, InstrumentRegistry::simulated());

    match cli.command {
        Commands::Status => {
            bench.connect(&config.addresses()).await;
            for line in bench.status().await {
                println!("{}", line);
            }
        }
        Commands::Check { device } => {
            connect(&bench, &config).await?;
            let present = bench.check(&Token::generate(), &device).await?;
            println!("{}: {}", device, if present { "present" } else { "absent" });
        }
        Commands::Calibrate { device, stage } => {
            connect(&bench, &config).await?;
            let token = Token::generate();
            let ok = match stage.as_deref().map(parse_stage).transpose()? {
                Some(stage) => bench.calibrate_stage(&token, stage).await?,
                None => bench.calibrate(&token, &device).await?,
            };
            if !ok {
                bail!("calibration failed");
            }
            println!("calibration complete");
        }
        Commands::Measure { device, token } => {
            connect(&bench, &config).await?;
            let token = token.map(Token::from).unwrap_or_else(Token::generate);
            let mut events = bench.subscribe();

            if !bench.measure(&token, &device).await? {
                while let Ok(event) = events.try_recv() {
                    if let BenchEvent::RunFailed { reason, .. } = event {
                        bail!("measurement failed: {}", reason);
                    }
                }
                bail!("measurement failed");
            }
            println!("{}", serde_json::to_string_pretty(&bench.result())?);
        }
        Commands::Devices => {
            let devices = bench.devices();
            for name in devices.devices() {
                let primary = devices.get(name)?;
                let values: Vec<String> =
                    primary.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                println!("{:<12} {}", name, values.join(" "));
            }
        }
        Commands::Params { action } => match action {
            ParamsAction::Show => {
                for (name, param) in bench.parameter_store().iter() {
                    println!(
                        "{:<12} {:<12} [{} .. {} step {}]",
                        name, param, param.range.start, param.range.end, param.range.step
                    );
                }
            }
            ParamsAction::Set { name, value } => {
                bench.set_secondary(&name, value)?;
                bench
                    .save_configs()
                    .with_context(|| format!("saving {}", bench.params_path().display()))?;
                println!("{} = {}", name, value);
            }
        },
    }

    Ok(())
}

async fn connect(bench: &Orchestrator, config: &BenchConfig) -> Result<()> {
    if !bench.connect(&config.addresses()).await {
        bail!("instrument discovery failed");
    }
    Ok(())
}

fn parse_stage(name: &str) -> Result<CalibrationStage> {
    match name.to_lowercase().as_str() {
        "lo" => Ok(CalibrationStage::Lo),
        "rf" => Ok(CalibrationStage::Rf),
        "mod" => Ok(CalibrationStage::Mod),
        other => bail!("unknown calibration stage '{}'", other),
    }
}
