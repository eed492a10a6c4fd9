//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! Produces the commented INI representation written to `config.ini`.

use std::fmt::Write as _;

use crate::link::TelemetryRate;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let connect = config.link.connect.as_deref().unwrap_or("");
    let rate = match config.link.telemetry_rate {
        TelemetryRate::Fast => "fast",
        TelemetryRate::Medium => "medium",
        TelemetryRate::Slow => "slow",
    };

    let mut out = format!(
        r#"[link]
; Default connect endpoint for live monitoring, host:port
; Example: connect = localhost:8800
connect = {}
; Callsign transmitted while operating as a store-and-forward repeater
callsign = {}
; Default radio frequency in kHz
frequency = {}
; Telemetry rate step: fast, medium or slow
; Slower rates carry further; reply timeouts scale to match
telemetry_rate = {}

[logging]
; Directory for log files
directory = {}
; Log file name
file = {}

[frequencies]
; Per-device frequency overrides: <serial> = <kHz>
; Example: 1234 = 434550
"#,
        connect,
        config.link.callsign,
        config.link.frequency_khz,
        rate,
        config.logging.directory.display(),
        config.logging.file,
    );

    for (serial, khz) in &config.frequencies.by_serial {
        // Writing to a String cannot fail
        let _ = writeln!(out, "{serial} = {khz}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_ini;
    use super::*;
    use ini::Ini;

    #[test]
    fn test_round_trip() {
        let mut config = ConfigFile::default();
        config.link.connect = Some("tracker.local:8800".to_string());
        config.link.callsign = "KD7ABC".to_string();
        config.link.frequency_khz = 435_000;
        config.link.telemetry_rate = TelemetryRate::Medium;
        config.frequencies.by_serial.insert(1234, 434_550);
        config.frequencies.by_serial.insert(5678, 436_000);

        let text = to_config_string(&config);
        let reread = parse_ini(&Ini::load_from_str(&text).unwrap()).unwrap();
        assert_eq!(reread, config);
    }

    #[test]
    fn test_defaults_serialize_cleanly() {
        let text = to_config_string(&ConfigFile::default());
        assert!(text.contains("[link]"));
        assert!(text.contains("telemetry_rate = fast"));
        let reread = parse_ini(&Ini::load_from_str(&text).unwrap()).unwrap();
        assert_eq!(reread, ConfigFile::default());
    }
}
