//! Live telemetry frames.
//!
//! The link delivers received radio frames as `TELEM <hex>` lines. A frame
//! is `[length][payload][rssi][status][checksum]`: `length` counts the
//! payload bytes, the payload is type-tagged, `status` bit 7 is the radio
//! CRC flag and the checksum is the same 0x5A modular sum the log records
//! use, over every byte before the checksum byte.
//!
//! A frame that failed the radio CRC still carries usable signal strength,
//! so it surfaces as [`TelemetryEvent::CrcInvalid`] rather than an error -
//! it is a distinct condition, never a decoded record.

use thiserror::Error;
use tracing::trace;

use crate::calibration::CalibrationContext;
use crate::flight::{FlightDataSink, FlightState, GpsFix, Voltages};

use super::checksum_valid;

/// Frame bytes besides the payload: length, rssi, status, checksum.
const FRAME_OVERHEAD: usize = 4;

/// Payload type tags.
const TYPE_SENSOR: u8 = 0x01;
const TYPE_CONFIGURATION: u8 = 0x02;
const TYPE_LOCATION: u8 = 0x03;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The line is not a telemetry line at all.
    #[error("Not a telemetry line")]
    NotTelemetry,

    /// The hex body did not decode to bytes.
    #[error("Malformed hex in telemetry line")]
    BadHex,

    /// The byte count does not match the length byte.
    #[error("Telemetry frame length mismatch: length byte {expected}, {actual} payload bytes")]
    LengthMismatch { expected: usize, actual: usize },

    /// The frame checksum did not verify.
    #[error("Telemetry frame checksum mismatch")]
    BadChecksum,

    /// The payload type tag is not one this build knows.
    #[error("Unknown telemetry payload type {0:#04x}")]
    UnknownType(u8),
}

/// Sensor sample broadcast in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorData {
    pub tick: u16,
    pub state: FlightState,
    /// Raw accelerometer counts; conversion needs the calibration context.
    pub accel: i16,
    /// Compensated ambient pressure in Pa.
    pub pressure: u32,
    pub battery: u16,
    pub apogee: u16,
    pub main: u16,
}

/// Device configuration broadcast periodically; seeds the calibration
/// context the way a flight-start record does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigurationData {
    pub serial: u16,
    pub flight: u16,
    pub accel_plus_g: i16,
    pub accel_minus_g: i16,
    pub ground_accel: i16,
    pub ground_pressure: u32,
    pub ticks_per_sec: u16,
}

/// GPS position broadcast; always a complete fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationData {
    pub tick: u16,
    pub nsats: u8,
    /// Degrees * 1e7.
    pub latitude: i32,
    /// Degrees * 1e7.
    pub longitude: i32,
    /// Meters.
    pub altitude: i32,
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Degrees.
    pub course: u16,
}

/// One received telemetry frame, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// Radio CRC failed; only the signal strength is trustworthy.
    CrcInvalid { rssi: i8 },
    Sensor { data: SensorData, rssi: i8 },
    Configuration { data: ConfigurationData, rssi: i8 },
    Location { data: LocationData, rssi: i8 },
}

impl TelemetryEvent {
    pub fn rssi(&self) -> i8 {
        match self {
            Self::CrcInvalid { rssi }
            | Self::Sensor { rssi, .. }
            | Self::Configuration { rssi, .. }
            | Self::Location { rssi, .. } => *rssi,
        }
    }

    /// Feed this frame through the same ingestion path log records use.
    ///
    /// CRC-invalid frames are a no-op here; callers that want to count or
    /// display them match on the event first.
    pub fn dispatch(&self, calibration: &mut CalibrationContext, sink: &mut dyn FlightDataSink) {
        match self {
            Self::CrcInvalid { .. } => {}
            Self::Sensor { data, .. } => {
                let wide = calibration.set_tick(data.tick);
                sink.set_tick(wide);
                if data.state == FlightState::Boost {
                    calibration.latch_boost();
                }
                sink.set_state(data.state);
                if let Some(accel) = calibration.acceleration(data.accel as i32) {
                    sink.set_acceleration(accel);
                }
                sink.set_pressure(data.pressure as f64, None);
                sink.set_voltages(Voltages {
                    battery: Some(adc_volts(data.battery)),
                    apogee: Some(adc_volts(data.apogee)),
                    main: Some(adc_volts(data.main)),
                });
            }
            Self::Configuration { data, .. } => {
                calibration.serial = Some(data.serial);
                calibration.flight = Some(data.flight);
                calibration.accel_plus_g = Some(data.accel_plus_g as i32);
                calibration.accel_minus_g = Some(data.accel_minus_g as i32);
                calibration.ground_accel = Some(data.ground_accel as i32);
                calibration.ground_pressure = Some(data.ground_pressure as f64);
                calibration.ticks_per_sec = Some(data.ticks_per_sec as f64);
            }
            Self::Location { data, .. } => {
                let wide = calibration.set_tick(data.tick);
                sink.set_tick(wide);
                let fix = GpsFix {
                    latitude: Some(data.latitude as f64 * 1e-7),
                    longitude: Some(data.longitude as f64 * 1e-7),
                    altitude: Some(data.altitude as f64),
                    time: chrono::NaiveDate::from_ymd_opt(
                        2000 + data.year as i32,
                        data.month as u32,
                        data.day as u32,
                    )
                    .and_then(|d| {
                        d.and_hms_opt(data.hour as u32, data.minute as u32, data.second as u32)
                    }),
                    nsats: Some(data.nsats),
                    course: Some(data.course as f64),
                    ground_speed: None,
                };
                sink.set_gps(fix);
            }
        }
    }
}

fn adc_volts(counts: u16) -> f64 {
    counts as f64 / 32_767.0 * 15.0
}

/// Parse a `TELEM <hex>` link line into a classified event.
pub fn parse_frame(line: &str) -> Result<TelemetryEvent, TelemetryError> {
    let hex = line
        .trim()
        .strip_prefix("TELEM")
        .ok_or(TelemetryError::NotTelemetry)?
        .trim();
    let bytes = decode_hex(hex)?;
    if bytes.len() < FRAME_OVERHEAD {
        return Err(TelemetryError::LengthMismatch {
            expected: FRAME_OVERHEAD,
            actual: bytes.len(),
        });
    }
    let payload_len = bytes[0] as usize;
    if bytes.len() != payload_len + FRAME_OVERHEAD {
        return Err(TelemetryError::LengthMismatch {
            expected: payload_len,
            actual: bytes.len() - FRAME_OVERHEAD,
        });
    }
    if !checksum_valid(&bytes) {
        return Err(TelemetryError::BadChecksum);
    }

    let rssi = bytes[bytes.len() - 3] as i8;
    let status = bytes[bytes.len() - 2];
    if status & 0x80 == 0 {
        trace!(rssi, "telemetry frame failed radio CRC");
        return Ok(TelemetryEvent::CrcInvalid { rssi });
    }

    let payload = &bytes[1..1 + payload_len];
    let event = match payload.first().copied() {
        Some(TYPE_SENSOR) if payload.len() >= 16 => TelemetryEvent::Sensor {
            data: SensorData {
                state: FlightState::from_wire(payload[1]),
                tick: u16_at(payload, 2),
                accel: u16_at(payload, 4) as i16,
                pressure: u32_at(payload, 6),
                battery: u16_at(payload, 10),
                apogee: u16_at(payload, 12),
                main: u16_at(payload, 14),
            },
            rssi,
        },
        Some(TYPE_CONFIGURATION) if payload.len() >= 18 => TelemetryEvent::Configuration {
            data: ConfigurationData {
                serial: u16_at(payload, 2),
                flight: u16_at(payload, 4),
                accel_plus_g: u16_at(payload, 6) as i16,
                accel_minus_g: u16_at(payload, 8) as i16,
                ground_accel: u16_at(payload, 10) as i16,
                ground_pressure: u32_at(payload, 12),
                ticks_per_sec: u16_at(payload, 16),
            },
            rssi,
        },
        Some(TYPE_LOCATION) if payload.len() >= 24 => TelemetryEvent::Location {
            data: LocationData {
                nsats: payload[1],
                tick: u16_at(payload, 2),
                latitude: u32_at(payload, 4) as i32,
                longitude: u32_at(payload, 8) as i32,
                altitude: u32_at(payload, 12) as i32,
                year: payload[16],
                month: payload[17],
                day: payload[18],
                hour: payload[19],
                minute: payload[20],
                second: payload[21],
                course: u16_at(payload, 22),
            },
            rssi,
        },
        Some(other) => return Err(TelemetryError::UnknownType(other)),
        None => return Err(TelemetryError::UnknownType(0)),
    };
    Ok(event)
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, TelemetryError> {
    let compact: String = hex.split_whitespace().collect();
    if compact.len() % 2 != 0 {
        return Err(TelemetryError::BadHex);
    }
    (0..compact.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&compact[i..i + 2], 16).map_err(|_| TelemetryError::BadHex))
        .collect()
}

fn u16_at(bytes: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([bytes[i], bytes[i + 1]])
}

fn u32_at(bytes: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
}
