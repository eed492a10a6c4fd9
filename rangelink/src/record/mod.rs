//! Record Decoder - binary flight-log records, one layout per hardware family.
//!
//! A recovered EEPROM log (or a decoded telemetry frame) is a flat run of
//! fixed-length binary records. Every hardware/firmware generation defines
//! its own record length and payload layout, selected once per log by the
//! header's format tag; all families share a four-byte record header of
//! command byte, checksum byte and 16-bit tick.
//!
//! Decoding produces a strictly time-ordered sequence of [`Record`] views
//! over the shared immutable buffer: no record owns its bytes. The two
//! repairs applied here are the modular-sum checksum (failing records are
//! skipped, counted, never fatal) and 16-bit tick wraparound (one
//! storage-order pass extends raw ticks to monotonic wide ticks).

pub mod dispatch;
pub mod eeprom;
pub mod telemetry;

use thiserror::Error;
use tracing::{debug, warn};

use crate::calibration::CalibrationContext;
use crate::flight::FlightDataSink;
use dispatch::Dispatcher;

/// Shared record header length: command, checksum, 16-bit tick.
pub const HEADER_LEN: usize = 4;

/// Record commands shared by the field-split families.
pub mod cmd {
    /// Flight start: flight number and ground calibration baseline.
    pub const FLIGHT: u8 = b'F';
    /// Sensor sample.
    pub const SENSOR: u8 = b'A';
    /// Temperature and voltages.
    pub const TEMP_VOLT: u8 = b'T';
    /// Deploy-channel continuity sense.
    pub const DEPLOY: u8 = b'D';
    /// Flight state transition.
    pub const STATE: u8 = b'S';
    /// GPS time of day.
    pub const GPS_TIME: u8 = b'G';
    /// GPS latitude.
    pub const GPS_LAT: u8 = b'N';
    /// GPS longitude.
    pub const GPS_LON: u8 = b'W';
    /// GPS altitude.
    pub const GPS_ALT: u8 = b'H';
    /// GPS satellites in view.
    pub const GPS_SAT: u8 = b'V';
    /// GPS date.
    pub const GPS_DATE: u8 = b'Y';
    /// Companion board payload.
    pub const COMPANION: u8 = b'C';
    /// Atomic GPS fix (Gps family only).
    pub const GPS_FIX: u8 = b'P';
}

/// Decode errors that fail the whole log.
///
/// Per-record corruption is not here on purpose: bad checksums and trailing
/// truncation are recovered locally and surface only as counters on
/// [`DecodedLog`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The header named a log format this build does not know.
    #[error("Unknown log format tag {0}")]
    UnknownFormat(u8),

    /// The calibration context carries no format tag at all.
    #[error("No log format recorded in header")]
    MissingFormat,
}

/// The closed set of hardware families, keyed by the header format tag.
///
/// Each family carries only its own layout constants; there is no shared
/// mutable base state. Adding a family means adding a variant and its arm in
/// the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// First-generation board: 8-byte records, analog baro, single-axis accel.
    Full,
    /// Pressure-only logger: 8-byte records, no accelerometer.
    Tiny,
    /// Second-generation board: 16-byte records, digital baro.
    Metrum,
    /// Full IMU board: 32-byte records, 3-axis accel/gyro/mag, pyro channels.
    Mega,
    /// Baro-only deployment board: 16-byte records.
    Mini,
    /// GPS tracker: 32-byte atomic fix records.
    Gps,
}

impl LogFormat {
    /// Resolve the header format tag, closed.
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            1 => Ok(Self::Full),
            2 => Ok(Self::Tiny),
            3 => Ok(Self::Metrum),
            4 => Ok(Self::Mega),
            5 => Ok(Self::Mini),
            6 => Ok(Self::Gps),
            other => Err(DecodeError::UnknownFormat(other)),
        }
    }

    /// The header format tag for this family.
    pub fn tag(self) -> u8 {
        match self {
            Self::Full => 1,
            Self::Tiny => 2,
            Self::Metrum => 3,
            Self::Mega => 4,
            Self::Mini => 5,
            Self::Gps => 6,
        }
    }

    /// Fixed record length in bytes.
    pub fn record_len(self) -> usize {
        match self {
            Self::Full | Self::Tiny => 8,
            Self::Metrum | Self::Mini => 16,
            Self::Mega | Self::Gps => 32,
        }
    }

    /// Whether GPS fixes arrive atomically (one record = one fix).
    ///
    /// Field-split families spread a fix over several records and rely on
    /// the pending-fix flush rule.
    pub fn atomic_gps(self) -> bool {
        matches!(self, Self::Gps)
    }

    /// Whether a pending half-built fix is published at end of stream.
    ///
    /// True for the field-split families: a truncated log ends mid-fix and
    /// the flush-on-next-record rule would otherwise drop it.
    pub fn flush_pending_gps_at_eof(self) -> bool {
        !self.atomic_gps()
    }
}

/// Modular-sum record checksum.
///
/// A record is valid iff `(0x5A + sum of all bytes) % 256 == 0`.
pub fn checksum_valid(bytes: &[u8]) -> bool {
    let sum = bytes.iter().fold(0x5au8, |acc, &b| acc.wrapping_add(b));
    sum == 0
}

/// The checksum byte that makes `bytes` (with its checksum slot zeroed)
/// valid. Used by the container writer and by tests building records.
pub fn checksum_byte(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0x5au8, |acc, &b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}

/// One decoded record: an immutable view over the shared log buffer.
///
/// Carries the type tag, raw tick, backing-buffer offset and the derived
/// wide tick. The wide tick is a sort/time key only; payload decoding always
/// goes back to the raw bytes.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    format: LogFormat,
    bytes: &'a [u8],
    offset: usize,
    wide_tick: u64,
}

impl<'a> Record<'a> {
    /// The record's command byte.
    pub fn cmd(&self) -> u8 {
        self.bytes[0]
    }

    /// The raw 16-bit hardware tick.
    pub fn tick(&self) -> u16 {
        u16::from_le_bytes([self.bytes[2], self.bytes[3]])
    }

    /// The wraparound-repaired tick, monotonic over the whole log.
    pub fn wide_tick(&self) -> u64 {
        self.wide_tick
    }

    /// Offset of this record in the backing buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The family this record was decoded under.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// The raw record bytes, header included.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Sort class: the flight-start record precedes everything regardless
    /// of tick, since it establishes the calibration baseline.
    fn class(&self) -> u8 {
        if self.cmd() == cmd::FLIGHT {
            0
        } else {
            1
        }
    }

    // ---- little-endian payload accessors ----

    pub(crate) fn u16_at(&self, i: usize) -> u16 {
        u16::from_le_bytes([self.bytes[i], self.bytes[i + 1]])
    }

    pub(crate) fn i16_at(&self, i: usize) -> i16 {
        self.u16_at(i) as i16
    }

    pub(crate) fn u24_at(&self, i: usize) -> u32 {
        u32::from_le_bytes([self.bytes[i], self.bytes[i + 1], self.bytes[i + 2], 0])
    }

    pub(crate) fn u32_at(&self, i: usize) -> u32 {
        u32::from_le_bytes([
            self.bytes[i],
            self.bytes[i + 1],
            self.bytes[i + 2],
            self.bytes[i + 3],
        ])
    }

    pub(crate) fn i32_at(&self, i: usize) -> i32 {
        self.u32_at(i) as i32
    }
}

/// A fully decoded log: ordered records plus repair counters.
#[derive(Debug)]
pub struct DecodedLog<'a> {
    format: LogFormat,
    records: Vec<Record<'a>>,
    /// Records whose tick needed wraparound repair.
    pub corrected: u64,
    /// Records dropped for checksum failure or trailing truncation.
    pub skipped: u64,
}

impl<'a> DecodedLog<'a> {
    /// The family this log decoded under.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// The records in (class, wide tick, offset) order.
    pub fn records(&self) -> &[Record<'a>] {
        &self.records
    }

    /// Replay the ordered records through the ingestion interface.
    ///
    /// Converts raw fields to engineering units via the calibration context
    /// and drives the sink; flushes any pending GPS fix at end of stream
    /// where the family calls for it.
    pub fn replay(&self, calibration: &mut CalibrationContext, sink: &mut dyn FlightDataSink) {
        let mut dispatcher = Dispatcher::new();
        for record in &self.records {
            dispatcher.dispatch(record, calibration, sink);
        }
        dispatcher.finish(self.format, sink);
    }
}

/// Decode a log buffer into an ordered record sequence.
///
/// The format tag comes from the calibration context (populated by the
/// EEPROM header or configuration telemetry). An unknown tag fails the whole
/// decode closed; per-record checksum failures and a truncated tail are
/// skipped and counted.
pub fn decode<'a>(
    data: &'a [u8],
    calibration: &CalibrationContext,
) -> Result<DecodedLog<'a>, DecodeError> {
    let tag = calibration.log_format.ok_or(DecodeError::MissingFormat)?;
    let format = LogFormat::from_tag(tag).inspect_err(|e| warn!(error = %e, "decode failed"))?;
    decode_as(data, format)
}

/// Decode a log buffer under an explicitly chosen family.
pub fn decode_as(data: &[u8], format: LogFormat) -> Result<DecodedLog<'_>, DecodeError> {
    let len = format.record_len();
    let mut records = Vec::with_capacity(data.len() / len);
    let mut skipped = 0u64;

    for (index, chunk) in data.chunks(len).enumerate() {
        let offset = index * len;
        if chunk.len() < len {
            // Trailing truncation: drop the partial record
            skipped += 1;
            debug!(offset, "truncated trailing record skipped");
            break;
        }
        // All-0xff means erased flash past the end of the log
        if chunk.iter().all(|&b| b == 0xff) {
            break;
        }
        if !checksum_valid(chunk) {
            skipped += 1;
            debug!(offset, "checksum failure, record skipped");
            continue;
        }
        records.push(Record {
            format,
            bytes: chunk,
            offset,
            wide_tick: 0,
        });
    }

    // Wide-tick repair: one storage-order pass. Add 65536 whenever the next
    // raw tick is more than 32767 below the running tick, undoing one
    // 16-bit wrap.
    let mut corrected = 0u64;
    let mut base = 0u64;
    let mut running: Option<u64> = None;
    for record in &mut records {
        let mut wide = base + record.tick() as u64;
        if let Some(run) = running {
            if wide + 32767 < run {
                base += 65536;
                wide += 65536;
                corrected += 1;
            }
        }
        record.wide_tick = wide;
        running = Some(wide);
    }

    records.sort_by_key(|r| (r.class(), r.wide_tick, r.offset));

    Ok(DecodedLog {
        format,
        records,
        corrected,
        skipped,
    })
}
