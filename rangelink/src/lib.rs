//! Rangelink - Ground-station data acquisition and flight reconstruction
//!
//! This library converts two kinds of raw input from rocket flight-computer
//! hardware - a live line stream from a serial/radio link and a stored EEPROM
//! flight log - into a calibrated, time-ordered description of a flight:
//! phase transitions and continuous physical quantities.
//!
//! # Pipeline
//!
//! ```ignore
//! use rangelink::calibration::CalibrationContext;
//! use rangelink::flight::FlightTracker;
//! use rangelink::record::eeprom::EepromLog;
//!
//! let text = std::fs::read_to_string("flight-42.eeprom")?;
//! let log = EepromLog::parse(&text)?;
//! let mut calibration = log.calibration.clone();
//! let decoded = rangelink::record::decode(log.data(), &calibration)?;
//!
//! let mut tracker = FlightTracker::from_calibration(&calibration);
//! decoded.replay(&mut calibration, &mut tracker);
//! println!("max height: {:?}", tracker.max_height());
//! ```
//!
//! # Components
//!
//! - [`link`] - one duplex connection: command/reply protocol, telemetry
//!   fan-out, store-and-forward remote mode
//! - [`record`] - per-family binary record decoding, EEPROM log container,
//!   live telemetry frames
//! - [`calibration`] - raw counts to engineering units, the flight-relative
//!   time base
//! - [`flight`] - the flight-phase state machine and derived quantities
//! - [`config`] - the injected preferences store
//! - [`logging`] - tracing initialization for the CLI

pub mod calibration;
pub mod config;
pub mod flight;
pub mod link;
pub mod logging;
pub mod record;

/// Version of the rangelink library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
