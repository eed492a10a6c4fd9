//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file. These
//! are pure data types with no parsing or serialization logic.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::link::TelemetryRate;
use crate::logging;

/// Default radio frequency in kHz (70 cm band).
pub const DEFAULT_FREQUENCY_KHZ: u32 = 434_550;

/// Placeholder callsign; users substitute their own.
pub const DEFAULT_CALLSIGN: &str = "N0CALL";

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub link: LinkSettings,
    pub logging: LoggingSettings,
    pub frequencies: FrequencySettings,
}

impl ConfigFile {
    /// The frequency to tune for a given device: the per-serial entry if
    /// one exists, else the global default.
    pub fn frequency_for_serial(&self, serial: u16) -> u32 {
        self.frequencies
            .by_serial
            .get(&serial)
            .copied()
            .unwrap_or(self.link.frequency_khz)
    }
}

/// Link configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    /// Default connect endpoint, `host:port` (None = must be given on the
    /// command line).
    pub connect: Option<String>,
    /// Callsign transmitted in remote mode.
    pub callsign: String,
    /// Default radio frequency in kHz.
    pub frequency_khz: u32,
    /// Telemetry rate step.
    pub telemetry_rate: TelemetryRate,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            connect: None,
            callsign: DEFAULT_CALLSIGN.to_string(),
            frequency_khz: DEFAULT_FREQUENCY_KHZ,
            telemetry_rate: TelemetryRate::Fast,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Directory for log files.
    pub directory: PathBuf,
    /// Log file name within the directory.
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(logging::default_log_dir()),
            file: logging::default_log_file().to_string(),
        }
    }
}

/// Per-device frequency overrides: serial number to kHz.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencySettings {
    pub by_serial: BTreeMap<u16, u32>,
}
