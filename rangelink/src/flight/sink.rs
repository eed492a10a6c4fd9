//! The ingestion interface.
//!
//! [`FlightDataSink`] is the shared consumer contract and the only channel
//! by which calibrated data reaches the Flight State Tracker. The record
//! dispatcher and the telemetry frame decoder both drive it; anything else
//! that wants a live copy of the stream (a position logger, an exporter)
//! implements it too.
//!
//! All methods default to no-ops so a consumer implements only what it
//! consumes.

use super::gps::GpsFix;
use super::state::FlightState;

/// Deploy-channel and battery voltages from one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Voltages {
    /// Main battery, volts.
    pub battery: Option<f64>,
    /// Apogee (drogue) continuity sense, volts.
    pub apogee: Option<f64>,
    /// Main-deploy continuity sense, volts.
    pub main: Option<f64>,
}

/// Consumer contract for the calibrated event stream.
///
/// Values arrive in record order; `set_tick` precedes the samples taken at
/// that tick. Implementations are single-writer: feeding one sink from both
/// a live link and a replay concurrently is a usage error.
pub trait FlightDataSink {
    /// The wide (wraparound-repaired) tick the following samples belong to.
    fn set_tick(&mut self, _tick: u64) {}

    /// Flight state transition.
    fn set_state(&mut self, _state: FlightState) {}

    /// Ambient pressure in Pa, with sensor temperature when available.
    fn set_pressure(&mut self, _pressure: f64, _temperature: Option<f64>) {}

    /// Single-axis acceleration along the flight axis, m/s^2.
    fn set_acceleration(&mut self, _accel: f64) {}

    /// Three-axis acceleration in the device frame, m/s^2.
    fn set_accel_vector(&mut self, _accel: [f64; 3]) {}

    /// Three-axis angular rate in the device frame, degrees/second.
    fn set_gyro(&mut self, _rate: [f64; 3]) {}

    /// Three-axis magnetic field in the device frame, gauss.
    fn set_mag(&mut self, _field: [f64; 3]) {}

    /// A published GPS fix. Never partially overwritten afterwards.
    fn set_gps(&mut self, _fix: GpsFix) {}

    /// An in-progress fix that has not yet published.
    fn set_gps_partial(&mut self, _fix: &GpsFix) {}

    /// Battery and deploy-channel voltages.
    fn set_voltages(&mut self, _voltages: Voltages) {}

    /// Bitmask of pyro channels that have fired.
    fn set_pyro_fired(&mut self, _channels: u16) {}

    /// Motor chamber pressure in Pa.
    fn set_motor_pressure(&mut self, _pressure: f64) {}

    /// Companion-board payload bytes.
    fn set_companion(&mut self, _board_id: u16, _data: &[u8]) {}

    /// Onboard Kalman estimate of height (m), speed (m/s), accel (m/s^2).
    fn set_kalman(&mut self, _height: f64, _speed: f64, _accel: f64) {}
}
