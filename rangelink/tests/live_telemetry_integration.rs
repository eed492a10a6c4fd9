//! Integration tests for the live acquisition path.
//!
//! Frames travel the same route the monitor command uses: a duplex link
//! carries `TELEM` lines to a subscriber, which parses them and feeds the
//! flight tracker through the shared ingestion interface.

use rangelink::calibration::{altitude_to_pressure, CalibrationContext};
use rangelink::flight::{FlightState, FlightTracker};
use rangelink::link::{Link, LinkConfig};
use rangelink::record::telemetry::{parse_frame, TelemetryEvent};
use rangelink::record::checksum_byte;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

// =============================================================================
// Frame builders
// =============================================================================

fn frame_line(payload: &[u8], rssi: i8, crc_ok: bool) -> String {
    let mut bytes = Vec::with_capacity(payload.len() + 4);
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(payload);
    bytes.push(rssi as u8);
    bytes.push(if crc_ok { 0x80 } else { 0x00 });
    bytes.push(0);
    let cs = checksum_byte(&bytes);
    let last = bytes.len() - 1;
    bytes[last] = cs;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("TELEM {hex}")
}

fn configuration_payload() -> Vec<u8> {
    let mut p = vec![0x02, 0];
    p.extend_from_slice(&1234u16.to_le_bytes());
    p.extend_from_slice(&42u16.to_le_bytes());
    p.extend_from_slice(&1496i16.to_le_bytes());
    p.extend_from_slice(&(-1304i16).to_le_bytes());
    p.extend_from_slice(&100i16.to_le_bytes());
    p.extend_from_slice(&(altitude_to_pressure(0.0) as u32).to_le_bytes());
    p.extend_from_slice(&100u16.to_le_bytes());
    p
}

fn sensor_payload(tick: u16, state: FlightState, accel: i16, pressure: u32) -> Vec<u8> {
    let mut p = vec![0x01, state.wire()];
    p.extend_from_slice(&tick.to_le_bytes());
    p.extend_from_slice(&accel.to_le_bytes());
    p.extend_from_slice(&pressure.to_le_bytes());
    p.extend_from_slice(&16000u16.to_le_bytes());
    p.extend_from_slice(&10000u16.to_le_bytes());
    p.extend_from_slice(&10000u16.to_le_bytes());
    p
}

/// A config broadcast followed by a short pad wait and the start of boost.
fn flight_frames() -> Vec<String> {
    let ground = altitude_to_pressure(0.0) as u32;
    let mut lines = vec![frame_line(&configuration_payload(), -35, true)];
    for i in 0..10u16 {
        lines.push(frame_line(
            &sensor_payload(i * 50, FlightState::Pad, 100, ground),
            -35,
            true,
        ));
    }
    for i in 0..5u16 {
        let altitude = (i as f64 * 4.0).max(0.0);
        lines.push(frame_line(
            &sensor_payload(
                500 + i * 10,
                FlightState::Boost,
                1500,
                altitude_to_pressure(altitude) as u32,
            ),
            -42,
            true,
        ));
    }
    lines
}

// =============================================================================
// Integration tests
// =============================================================================

#[test]
fn test_frames_reconstruct_live_flight() {
    let mut calibration = CalibrationContext::new();
    let mut tracker = FlightTracker::new();

    for line in flight_frames() {
        let event = parse_frame(&line).unwrap();
        event.dispatch(&mut calibration, &mut tracker);
    }

    // The config frame seeded the calibration before any sensor frame
    assert_eq!(calibration.serial, Some(1234));
    assert_eq!(calibration.flight, Some(42));

    assert_eq!(tracker.state(), FlightState::Boost);
    assert_eq!(calibration.boost_tick(), Some(500));

    let accel = tracker.acceleration().unwrap();
    assert!((accel - 19.61).abs() < 0.01, "boost accel {accel}");

    // Battery sense: 16000 counts of a 15 V full-scale ADC
    let battery = tracker.voltages().battery.unwrap();
    assert!((battery - 7.32).abs() < 0.01, "battery {battery}");

    // Pad frames re-timed against the boost tick
    let summary = tracker.summary();
    assert_eq!(summary.state_times[0], (FlightState::Pad, -5.0));
    assert_eq!(summary.state_times[1], (FlightState::Boost, 0.0));
}

#[test]
fn test_crc_invalid_frames_do_not_disturb_tracking() {
    let mut calibration = CalibrationContext::new();
    let mut tracker = FlightTracker::new();

    for line in flight_frames() {
        let event = parse_frame(&line).unwrap();
        event.dispatch(&mut calibration, &mut tracker);
    }
    let before = tracker.summary();

    // A garbled frame that failed the radio CRC carries only its rssi
    let noise = frame_line(&sensor_payload(9000, FlightState::Landed, 0, 1), -95, false);
    let event = parse_frame(&noise).unwrap();
    assert_eq!(event, TelemetryEvent::CrcInvalid { rssi: -95 });
    event.dispatch(&mut calibration, &mut tracker);

    assert_eq!(tracker.state(), FlightState::Boost);
    assert_eq!(tracker.summary(), before);
}

#[tokio::test]
async fn test_link_delivers_frames_to_tracker() {
    let (device, station) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(station);
    let link = Link::spawn(reader, writer, LinkConfig::default());
    let mut telemetry = link.subscribe();

    let (mut device_read, mut device_write) = tokio::io::split(device);
    // Drain anything the link writes so the device side never applies
    // backpressure
    tokio::spawn(async move {
        let _ = tokio::io::copy(&mut device_read, &mut tokio::io::sink()).await;
    });

    let frames = flight_frames();
    let frame_count = frames.len();
    tokio::spawn(async move {
        for line in frames {
            device_write
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }
    });

    let mut calibration = CalibrationContext::new();
    let mut tracker = FlightTracker::new();
    let mut received = 0;
    while received < frame_count {
        let line = tokio::time::timeout(Duration::from_secs(1), telemetry.recv())
            .await
            .expect("telemetry line")
            .unwrap();
        if let Ok(event) = parse_frame(&line) {
            event.dispatch(&mut calibration, &mut tracker);
            received += 1;
        }
    }

    assert_eq!(tracker.state(), FlightState::Boost);
    assert_eq!(calibration.serial, Some(1234));
    link.shutdown().await;
}
