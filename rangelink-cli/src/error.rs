//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use rangelink::config::ConfigFileError;
use rangelink::link::LinkError;
use rangelink::record::eeprom::EepromError;
use rangelink::record::DecodeError;
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Configuration error
    Config(ConfigFileError),
    /// Failed to read an input file
    FileRead { path: String, error: std::io::Error },
    /// Malformed EEPROM log container
    LogParse(EepromError),
    /// Failed to decode the binary record stream
    Decode(DecodeError),
    /// Failed to connect to the device endpoint
    Connect { endpoint: String, error: std::io::Error },
    /// Link protocol error
    Link(LinkError),
    /// No endpoint given and none configured
    MissingEndpoint,
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        match self {
            CliError::MissingEndpoint => {
                eprintln!();
                eprintln!("Pass --connect <host:port> or set it in the config file:");
                eprintln!("  [link]");
                eprintln!("  connect = localhost:8800");
            }
            CliError::Link(LinkError::Disconnected) => {
                eprintln!();
                eprintln!("The device closed the connection. Check that the ground");
                eprintln!("station is still attached and the TCP bridge is running.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::FileRead { path, error } => {
                write!(f, "Failed to read file '{}': {}", path, error)
            }
            CliError::LogParse(e) => write!(f, "Malformed EEPROM log: {}", e),
            CliError::Decode(e) => write!(f, "Failed to decode log: {}", e),
            CliError::Connect { endpoint, error } => {
                write!(f, "Failed to connect to '{}': {}", endpoint, error)
            }
            CliError::Link(e) => write!(f, "Link error: {}", e),
            CliError::MissingEndpoint => write!(f, "No device endpoint specified"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Runtime(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::FileRead { error, .. } => Some(error),
            CliError::LogParse(e) => Some(e),
            CliError::Decode(e) => Some(e),
            CliError::Connect { error, .. } => Some(error),
            CliError::Link(e) => Some(e),
            _ => None,
        }
    }
}
