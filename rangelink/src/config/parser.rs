//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;

use crate::link::TelemetryRate;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in
/// the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [link] section
    if let Some(section) = ini.section(Some("link")) {
        if let Some(v) = section.get("connect") {
            let v = v.trim();
            if !v.is_empty() {
                config.link.connect = Some(v.to_string());
            }
        }
        if let Some(v) = section.get("callsign") {
            let v = v.trim();
            if !v.is_empty() {
                config.link.callsign = v.to_string();
            }
        }
        if let Some(v) = section.get("frequency") {
            config.link.frequency_khz =
                v.parse().map_err(|_| ConfigFileError::InvalidValue {
                    section: "link".to_string(),
                    key: "frequency".to_string(),
                    value: v.to_string(),
                    reason: "must be a frequency in kHz, e.g. 434550".to_string(),
                })?;
        }
        if let Some(v) = section.get("telemetry_rate") {
            config.link.telemetry_rate = match v.to_lowercase().as_str() {
                "fast" => TelemetryRate::Fast,
                "medium" => TelemetryRate::Medium,
                "slow" => TelemetryRate::Slow,
                _ => {
                    return Err(ConfigFileError::InvalidValue {
                        section: "link".to_string(),
                        key: "telemetry_rate".to_string(),
                        value: v.to_string(),
                        reason: "must be one of: fast, medium, slow".to_string(),
                    });
                }
            };
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = PathBuf::from(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    // [frequencies] section: each key is a device serial, each value kHz
    if let Some(section) = ini.section(Some("frequencies")) {
        for (key, value) in section.iter() {
            let serial = key.parse().map_err(|_| ConfigFileError::InvalidValue {
                section: "frequencies".to_string(),
                key: key.to_string(),
                value: value.to_string(),
                reason: "key must be a device serial number".to_string(),
            })?;
            let khz = value.parse().map_err(|_| ConfigFileError::InvalidValue {
                section: "frequencies".to_string(),
                key: key.to_string(),
                value: value.to_string(),
                reason: "value must be a frequency in kHz".to_string(),
            })?;
            config.frequencies.by_serial.insert(serial, khz);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(text).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_parse_overlays_defaults() {
        let config = load(
            "[link]\nconnect = localhost:8800\nfrequency = 435000\ntelemetry_rate = slow\n",
        )
        .unwrap();
        assert_eq!(config.link.connect.as_deref(), Some("localhost:8800"));
        assert_eq!(config.link.frequency_khz, 435_000);
        assert_eq!(config.link.telemetry_rate, TelemetryRate::Slow);
        // Untouched sections keep defaults
        assert_eq!(config.logging, Default::default());
    }

    #[test]
    fn test_parse_frequencies_map() {
        let config = load("[frequencies]\n1234 = 434550\n5678 = 435000\n").unwrap();
        assert_eq!(config.frequency_for_serial(1234), 434_550);
        assert_eq!(config.frequency_for_serial(5678), 435_000);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let err = load("[link]\ntelemetry_rate = warp\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::InvalidValue { .. }));
    }

    #[test]
    fn test_invalid_serial_key_rejected() {
        let err = load("[frequencies]\nnot-a-serial = 434550\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::InvalidValue { .. }));
    }

    #[test]
    fn test_empty_values_keep_defaults() {
        let config = load("[link]\nconnect =\ncallsign =\n").unwrap();
        assert!(config.link.connect.is_none());
        assert_eq!(config.link.callsign, super::super::settings::DEFAULT_CALLSIGN);
    }
}
