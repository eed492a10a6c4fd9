//! Flight State Tracker - phase tracking and derived flight values.
//!
//! The tracker consumes the calibrated event stream through
//! [`FlightDataSink`] and derives the values a ground station displays:
//! height above pad, vertical speed, acceleration, orientation tilt, GPS
//! position, with running maxima and a post-flight time series.
//!
//! Derivations never fabricate: insufficient history yields `None`, and a
//! directly measured value (an onboard Kalman estimate) always wins over a
//! computed one.

pub mod derived;
pub mod filter;
pub mod gps;
pub mod quaternion;
pub mod sink;
pub mod state;
pub mod tracker;

pub use derived::{MeasuredOrComputed, Track};
pub use gps::{GpsFix, PendingFix};
pub use sink::{FlightDataSink, Voltages};
pub use state::FlightState;
pub use tracker::{FlightSample, FlightSummary, FlightTracker};
