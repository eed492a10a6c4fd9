//! Post-flight reconstruction from a saved EEPROM log.

use crate::error::CliError;
use rangelink::flight::{FlightSummary, FlightTracker};
use rangelink::record::eeprom::EepromLog;
use std::path::Path;
use tracing::info;

pub fn run(path: &Path, json_summary: bool) -> Result<(), CliError> {
    let text = std::fs::read_to_string(path).map_err(|error| CliError::FileRead {
        path: path.display().to_string(),
        error,
    })?;

    let log = EepromLog::parse(&text).map_err(CliError::LogParse)?;
    let mut calibration = log.calibration.clone();
    let decoded = log.decoded().map_err(CliError::Decode)?;

    info!(
        serial = ?calibration.serial,
        flight = ?calibration.flight,
        records = decoded.records().len(),
        corrected = decoded.corrected,
        skipped = decoded.skipped,
        "decoded EEPROM log"
    );

    let mut tracker = FlightTracker::from_calibration(&calibration);
    decoded.replay(&mut calibration, &mut tracker);
    let summary = tracker.summary();

    if json_summary {
        print_json(&calibration, &summary, &decoded);
    } else {
        print_human(&calibration, &summary, &decoded);
    }

    Ok(())
}

fn print_human(
    calibration: &rangelink::calibration::CalibrationContext,
    summary: &FlightSummary,
    decoded: &rangelink::record::DecodedLog<'_>,
) {
    if let Some(serial) = calibration.serial {
        print!("Serial {}", serial);
        if let Some(flight) = calibration.flight {
            print!(", flight {}", flight);
        }
        println!();
    }
    println!("Format: {:?} ({} byte records)", decoded.format(), decoded.format().record_len());
    println!();
    println!("Max height:       {}", meters(summary.max_height));
    println!("Max speed:        {}", meters_per_sec(summary.max_speed));
    println!("Max acceleration: {}", meters_per_sec2(summary.max_acceleration));

    if !summary.state_times.is_empty() {
        println!();
        println!("State times:");
        for (state, time) in &summary.state_times {
            println!("  {:<10} {:8.2} s", state.name(), time);
        }
    }

    println!();
    println!(
        "{} records, {} tick corrections, {} skipped",
        decoded.records().len(),
        decoded.corrected,
        decoded.skipped
    );
}

fn print_json(
    calibration: &rangelink::calibration::CalibrationContext,
    summary: &FlightSummary,
    decoded: &rangelink::record::DecodedLog<'_>,
) {
    let states: Vec<String> = summary
        .state_times
        .iter()
        .map(|(state, time)| format!(r#"{{"state":"{}","time":{:.2}}}"#, state.name(), time))
        .collect();

    println!(
        r#"{{"serial":{},"flight":{},"max_height":{},"max_speed":{},"max_acceleration":{},"state_times":[{}],"records":{},"corrected":{},"skipped":{}}}"#,
        json_opt_int(calibration.serial),
        json_opt_int(calibration.flight),
        json_opt_num(summary.max_height),
        json_opt_num(summary.max_speed),
        json_opt_num(summary.max_acceleration),
        states.join(","),
        decoded.records().len(),
        decoded.corrected,
        decoded.skipped,
    );
}

fn json_opt_int(value: Option<u16>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "null".to_string(),
    }
}

fn json_opt_num(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "null".to_string(),
    }
}

fn meters(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:8.1} m", v),
        None => "       - ".to_string(),
    }
}

fn meters_per_sec(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:8.1} m/s", v),
        None => "       - ".to_string(),
    }
}

fn meters_per_sec2(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:8.1} m/s\u{b2}", v),
        None => "       - ".to_string(),
    }
}
