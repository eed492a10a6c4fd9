//! Rangelink CLI - ground-station command-line interface.
//!
//! Two commands: `decode` reconstructs a flight from a saved EEPROM log,
//! `monitor` follows live telemetry from a connected ground-station device.

mod commands;
mod error;

use clap::{Parser, Subcommand, ValueEnum};
use commands::monitor::MonitorOptions;
use error::CliError;
use rangelink::config::ConfigFile;
use rangelink::link::TelemetryRate;
use rangelink::logging::init_logging;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RateArg {
    /// Full-rate telemetry, shortest range
    Fast,
    /// Half-rate telemetry
    Medium,
    /// Quarter-rate telemetry, longest range
    Slow,
}

impl From<RateArg> for TelemetryRate {
    fn from(rate: RateArg) -> Self {
        match rate {
            RateArg::Fast => TelemetryRate::Fast,
            RateArg::Medium => TelemetryRate::Medium,
            RateArg::Slow => TelemetryRate::Slow,
        }
    }
}

#[derive(Parser)]
#[command(name = "rangelink")]
#[command(version = rangelink::VERSION)]
#[command(about = "Ground-station toolkit for rocket flight computers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconstruct a flight from a saved EEPROM log file
    Decode {
        /// Path to the .eeprom log file
        file: PathBuf,

        /// Print the flight summary as a single JSON object
        #[arg(long)]
        json_summary: bool,
    },

    /// Connect to a ground-station device and follow live telemetry
    Monitor {
        /// Device endpoint, host:port (defaults to the configured endpoint)
        #[arg(long)]
        connect: Option<String>,

        /// Run the device as a store-and-forward repeater while monitoring
        #[arg(long)]
        remote: bool,

        /// Radio frequency in kHz (defaults to the configured frequency)
        #[arg(long)]
        frequency: Option<u32>,

        /// Callsign transmitted in remote mode
        #[arg(long)]
        callsign: Option<String>,

        /// Telemetry rate step
        #[arg(long, value_enum)]
        rate: Option<RateArg>,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match ConfigFile::load() {
        Ok(config) => config,
        Err(e) => CliError::Config(e).exit(),
    };

    let log_dir = config.logging.directory.to_string_lossy().to_string();
    let _logging_guard = match init_logging(&log_dir, &config.logging.file) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };
    info!("rangelink v{}", rangelink::VERSION);

    let result = match cli.command {
        Command::Decode { file, json_summary } => commands::decode::run(&file, json_summary),
        Command::Monitor {
            connect,
            remote,
            frequency,
            callsign,
            rate,
        } => commands::monitor::run(
            MonitorOptions {
                connect,
                remote,
                frequency,
                callsign,
                rate: rate.map(TelemetryRate::from),
            },
            &config,
        ),
    };

    if let Err(e) = result {
        e.exit();
    }
}
