//! The EEPROM flight-log container.
//!
//! A downloaded log is a text file in two parts: a header block of
//! `name value` lines carrying device identity and calibration, terminated
//! by the first data line, then the raw record bytes hex-encoded, space
//! separated and wrapped at 32 bytes per line.
//!
//! The header populates a fresh [`CalibrationContext`]. Unknown header keys
//! are preserved and re-emitted by the writer, never errors: newer firmware
//! adds keys and old files must keep loading.

use std::fmt::Write as _;

use thiserror::Error;
use tracing::debug;

use crate::calibration::{BaroCalibration, CalibrationContext, ImuModel, MagModel, PadOrientation};

use super::{decode, DecodeError, DecodedLog};

/// Data bytes per hex line in the container.
const HEX_BYTES_PER_LINE: usize = 32;

#[derive(Debug, Error)]
pub enum EepromError {
    /// A known header key carried an unparseable value.
    #[error("Invalid value '{value}' for header key '{key}'")]
    BadValue { key: String, value: String },

    /// A data line held something other than two-digit hex bytes.
    #[error("Malformed hex data on line {line}")]
    BadHex { line: usize },
}

/// A parsed log container: calibration header plus raw record bytes.
#[derive(Debug, Clone, Default)]
pub struct EepromLog {
    pub calibration: CalibrationContext,
    /// Sensor PROM words carried through for the writer but not used in
    /// conversion.
    pub ms5607_reserved: Option<u16>,
    pub ms5607_crc: Option<u16>,
    extras: Vec<(String, String)>,
    data: Vec<u8>,
}

impl EepromLog {
    pub fn new(calibration: CalibrationContext, data: Vec<u8>) -> Self {
        Self {
            calibration,
            data,
            ..Self::default()
        }
    }

    /// The raw record bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Header lines the parser did not recognize, in file order.
    pub fn extras(&self) -> &[(String, String)] {
        &self.extras
    }

    /// Decode the record bytes under the header's log format.
    pub fn decoded(&self) -> Result<DecodedLog<'_>, DecodeError> {
        decode(&self.data, &self.calibration)
    }

    /// Parse a container from its text form.
    pub fn parse(text: &str) -> Result<Self, EepromError> {
        let mut log = Self::default();
        let mut gyro = [None::<i32>; 3];
        let mut baro = [None::<u16>; 6];
        let mut in_data = false;

        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if !in_data && !is_data_line(line) {
                log.parse_header_line(line, &mut gyro, &mut baro)?;
                continue;
            }
            // The first data line ends the header for good
            in_data = true;
            for token in line.split_whitespace() {
                let byte = u8::from_str_radix(token, 16)
                    .map_err(|_| EepromError::BadHex { line: index + 1 })?;
                log.data.push(byte);
            }
        }

        if let [Some(x), Some(y), Some(z)] = gyro {
            log.calibration.set_gyro_zero([x, y, z]);
        }
        if let [Some(sens), Some(off), Some(tcs), Some(tco), Some(tref), Some(tempsens)] = baro {
            log.calibration.baro = Some(BaroCalibration {
                sens,
                off,
                tcs,
                tco,
                tref,
                tempsens,
            });
        }
        Ok(log)
    }

    fn parse_header_line(
        &mut self,
        line: &str,
        gyro: &mut [Option<i32>; 3],
        baro: &mut [Option<u16>; 6],
    ) -> Result<(), EepromError> {
        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (line, ""),
        };
        let cal = &mut self.calibration;
        match key {
            "serial-number" => cal.serial = Some(parse(key, value)?),
            "log-format" => cal.log_format = Some(parse(key, value)?),
            "flight" => cal.flight = Some(parse(key, value)?),
            "accel-cal-plus" => cal.accel_plus_g = Some(parse(key, value)?),
            "accel-cal-minus" => cal.accel_minus_g = Some(parse(key, value)?),
            "ground-accel" => cal.ground_accel = Some(parse(key, value)?),
            "ground-pressure" => cal.ground_pressure = Some(parse(key, value)?),
            "ticks-per-sec" => cal.ticks_per_sec = Some(parse(key, value)?),
            "gyro-cal-x" => gyro[0] = Some(parse(key, value)?),
            "gyro-cal-y" => gyro[1] = Some(parse(key, value)?),
            "gyro-cal-z" => gyro[2] = Some(parse(key, value)?),
            "imu-model" => {
                let id: u16 = parse(key, value)?;
                cal.imu_model = ImuModel::from_id(id).ok_or_else(|| bad(key, value))?;
            }
            "mag-model" => {
                let id: u16 = parse(key, value)?;
                cal.mag_model = MagModel::from_id(id).ok_or_else(|| bad(key, value))?;
            }
            "pad-orientation" => {
                let id: u8 = parse(key, value)?;
                cal.pad_orientation = PadOrientation::from_id(id).ok_or_else(|| bad(key, value))?;
            }
            "ms5607-sens" => baro[0] = Some(parse(key, value)?),
            "ms5607-off" => baro[1] = Some(parse(key, value)?),
            "ms5607-tcs" => baro[2] = Some(parse(key, value)?),
            "ms5607-tco" => baro[3] = Some(parse(key, value)?),
            "ms5607-tref" => baro[4] = Some(parse(key, value)?),
            "ms5607-tempsens" => baro[5] = Some(parse(key, value)?),
            "ms5607-reserved" => self.ms5607_reserved = Some(parse(key, value)?),
            "ms5607-crc" => self.ms5607_crc = Some(parse(key, value)?),
            _ => {
                debug!(key, value, "unrecognized log header key preserved");
                self.extras.push((key.to_string(), value.to_string()));
            }
        }
        Ok(())
    }

    /// Serialize back to the container text form.
    ///
    /// Re-reading the output reproduces the calibration context, the
    /// preserved unknown keys and the record bytes exactly.
    pub fn write(&self) -> String {
        let mut out = String::new();
        let cal = &self.calibration;

        let mut put = |key: &str, value: String| {
            // Infallible: writing to a String cannot fail
            let _ = writeln!(out, "{key} {value}");
        };
        if let Some(v) = cal.serial {
            put("serial-number", v.to_string());
        }
        if let Some(v) = cal.log_format {
            put("log-format", v.to_string());
        }
        if let Some(v) = cal.flight {
            put("flight", v.to_string());
        }
        if let Some(v) = cal.accel_plus_g {
            put("accel-cal-plus", v.to_string());
        }
        if let Some(v) = cal.accel_minus_g {
            put("accel-cal-minus", v.to_string());
        }
        if let Some(v) = cal.ground_accel {
            put("ground-accel", v.to_string());
        }
        if let Some(v) = cal.ground_pressure {
            put("ground-pressure", v.to_string());
        }
        if let Some(v) = cal.ticks_per_sec {
            put("ticks-per-sec", v.to_string());
        }
        if let Some([x, y, z]) = cal.gyro_zero() {
            put("gyro-cal-x", x.to_string());
            put("gyro-cal-y", y.to_string());
            put("gyro-cal-z", z.to_string());
        }
        put("imu-model", cal.imu_model.id().to_string());
        put("mag-model", cal.mag_model.id().to_string());
        put("pad-orientation", cal.pad_orientation.id().to_string());
        if let Some(v) = self.ms5607_reserved {
            put("ms5607-reserved", v.to_string());
        }
        if let Some(b) = cal.baro {
            put("ms5607-sens", b.sens.to_string());
            put("ms5607-off", b.off.to_string());
            put("ms5607-tcs", b.tcs.to_string());
            put("ms5607-tco", b.tco.to_string());
            put("ms5607-tref", b.tref.to_string());
            put("ms5607-tempsens", b.tempsens.to_string());
        }
        if let Some(v) = self.ms5607_crc {
            put("ms5607-crc", v.to_string());
        }
        for (key, value) in &self.extras {
            put(key, value.clone());
        }

        for chunk in self.data.chunks(HEX_BYTES_PER_LINE) {
            let line: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
            let _ = writeln!(out, "{}", line.join(" "));
        }
        out
    }
}

/// A line is data iff every token is a two-digit hex byte. Header keys all
/// contain non-hex characters, so the rule cannot misfire on them.
fn is_data_line(line: &str) -> bool {
    let mut tokens = line.split_whitespace().peekable();
    tokens.peek().is_some()
        && tokens.all(|t| t.len() == 2 && t.chars().all(|c| c.is_ascii_hexdigit()))
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, EepromError> {
    value.parse().map_err(|_| bad(key, value))
}

fn bad(key: &str, value: &str) -> EepromError {
    EepromError::BadValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::full_record;
    use crate::record::{cmd, LogFormat};

    fn sample_container() -> String {
        let rec = full_record(cmd::FLIGHT, 0, 42, 100);
        let hex: Vec<String> = rec.iter().map(|b| format!("{b:02x}")).collect();
        format!(
            "serial-number 1234\n\
             log-format 1\n\
             flight 42\n\
             accel-cal-plus 1496\n\
             accel-cal-minus -1304\n\
             ground-accel 100\n\
             ground-pressure 85000\n\
             ticks-per-sec 100\n\
             pad-orientation 0\n\
             {}\n",
            hex.join(" ")
        )
    }

    #[test]
    fn test_parse_header_and_data() {
        let log = EepromLog::parse(&sample_container()).unwrap();
        let cal = &log.calibration;
        assert_eq!(cal.serial, Some(1234));
        assert_eq!(cal.log_format, Some(1));
        assert_eq!(cal.flight, Some(42));
        assert_eq!(cal.accel_plus_g, Some(1496));
        assert_eq!(cal.accel_minus_g, Some(-1304));
        assert_eq!(cal.ground_pressure, Some(85000.0));
        assert_eq!(log.data().len(), 8);

        let decoded = log.decoded().unwrap();
        assert_eq!(decoded.format(), LogFormat::Full);
        assert_eq!(decoded.records().len(), 1);
    }

    #[test]
    fn test_unknown_keys_preserved_not_fatal() {
        let text = "serial-number 7\nfuture-key some value here\n5a 00 5a 00 00 00 00 52\n";
        let log = EepromLog::parse(text).unwrap();
        assert_eq!(log.calibration.serial, Some(7));
        assert_eq!(
            log.extras(),
            &[("future-key".to_string(), "some value here".to_string())]
        );
        assert!(log.write().contains("future-key some value here"));
    }

    #[test]
    fn test_round_trip() {
        let mut cal = CalibrationContext::new();
        cal.serial = Some(1234);
        cal.log_format = Some(4);
        cal.flight = Some(9);
        cal.accel_plus_g = Some(1496);
        cal.accel_minus_g = Some(-1304);
        cal.ground_pressure = Some(85000.0);
        cal.ticks_per_sec = Some(100.0);
        cal.set_gyro_zero([12, -7, 130]);
        cal.baro = Some(BaroCalibration {
            sens: 46372,
            off: 43981,
            tcs: 29059,
            tco: 27842,
            tref: 31553,
            tempsens: 28165,
        });
        let data: Vec<u8> = (0..70).collect();
        let log = EepromLog::new(cal.clone(), data.clone());

        let text = log.write();
        let reread = EepromLog::parse(&text).unwrap();
        assert_eq!(reread.calibration, cal);
        assert_eq!(reread.data(), data.as_slice());
        // 70 bytes wrap to lines of 32, 32 and 6
        let hex_lines: Vec<&str> = text
            .lines()
            .filter(|l| is_data_line(l.trim()))
            .collect();
        assert_eq!(hex_lines.len(), 3);
        assert_eq!(hex_lines[0].split_whitespace().count(), 32);
        assert_eq!(hex_lines[2].split_whitespace().count(), 6);
    }

    #[test]
    fn test_bad_value_for_known_key() {
        let err = EepromLog::parse("serial-number twelve\n").unwrap_err();
        assert!(matches!(err, EepromError::BadValue { .. }));
    }

    #[test]
    fn test_bad_hex_after_data_starts() {
        let text = "serial-number 1\n5a 00 5a 00\nzz 00\n";
        let err = EepromLog::parse(text).unwrap_err();
        assert!(matches!(err, EepromError::BadHex { line: 3 }));
    }

    #[test]
    fn test_header_ends_at_first_data_line() {
        // A header-looking line after data has begun is hex-rejected, not
        // parsed as a key
        let text = "5a 00\nserial-number 1\n";
        assert!(EepromLog::parse(text).is_err());
    }
}
