//! The Flight State Tracker.
//!
//! [`FlightTracker`] implements [`FlightDataSink`] and turns the calibrated
//! event stream into the values a ground station shows: height above pad,
//! vertical speed, acceleration, orientation tilt, GPS position, running
//! maxima and a post-flight time series.
//!
//! # Time bases
//!
//! Two are kept deliberately separate. The internal sample time base is
//! relative to the first tick seen and never moves; filter windows and
//! finite differences depend only on sample spacing, so they must not
//! shift when boost latches. User-facing flight time re-derives from the
//! boost tick on demand, so latching boost retroactively re-times
//! everything already recorded.

use tracing::debug;

use crate::calibration::{pressure_to_altitude, CalibrationContext, DEFAULT_TICKS_PER_SEC, GRAVITY};

use super::derived::{MeasuredOrComputed, Track};
use super::filter::{filter_at, ASCENT_FILTER_WIDTH, DESCENT_FILTER_WIDTH};
use super::gps::GpsFix;
use super::quaternion::Rotation;
use super::sink::{FlightDataSink, Voltages};
use super::state::FlightState;

/// Acceleration samples beyond this are sensor noise, not flight.
const MAX_ACCEL: f64 = 100.0 * GRAVITY;

/// Implied inter-sample angular acceleration beyond this is sensor noise.
/// The limit is the rate change a 100 g tangential kick would produce at
/// the sensor, in degrees/s^2.
const MAX_ANGULAR_ACCEL: f64 = 100.0 * GRAVITY * 180.0 / std::f64::consts::PI;

/// Pad pressure averaging stops growing the divisor past this many samples
/// so a long pad wait still tracks slow weather drift.
const GROUND_AVERAGE_CAP: u32 = 100;

/// One row of the post-flight time series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightSample {
    /// Flight-relative time in seconds.
    pub time: f64,
    pub height: Option<f64>,
    pub speed: Option<f64>,
    pub acceleration: Option<f64>,
    pub state: FlightState,
}

/// Headline numbers for a reconstructed flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightSummary {
    pub max_height: Option<f64>,
    pub max_speed: Option<f64>,
    pub max_acceleration: Option<f64>,
    /// Flight-relative entry time of each state transition, in order.
    pub state_times: Vec<(FlightState, f64)>,
}

/// Flight reconstruction driven through the ingestion interface.
#[derive(Debug)]
pub struct FlightTracker {
    ticks_per_sec: f64,
    accel_inverted: bool,

    tick: Option<u64>,
    first_tick: Option<u64>,
    boost_tick: Option<u64>,

    state: FlightState,
    state_ticks: Vec<(FlightState, u64)>,

    ground_pressure: Option<f64>,
    ground_samples: u32,

    raw_altitude: Vec<(f64, f64)>,
    filtered_altitude: Track,
    height: MeasuredOrComputed,
    height_track: Track,
    speed: MeasuredOrComputed,
    speed_track: Track,
    acceleration: MeasuredOrComputed,
    accel_track: Track,
    motor_pressure: Track,

    integrated_speed: Option<f64>,
    last_accel: Option<(f64, f64)>,

    orientation: Option<Rotation>,
    last_gyro_time: Option<f64>,
    last_gyro_rate: Option<[f64; 3]>,

    gps: Option<GpsFix>,
    gps_in_progress: Option<GpsFix>,
    gps_ground_altitude: Option<f64>,

    voltages: Voltages,
    pyro_fired: u16,
    companion: Option<(u16, Vec<u8>)>,

    series: Vec<(u64, Option<f64>, Option<f64>, Option<f64>, FlightState)>,
}

impl Default for FlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightTracker {
    pub fn new() -> Self {
        Self {
            ticks_per_sec: DEFAULT_TICKS_PER_SEC,
            accel_inverted: false,
            tick: None,
            first_tick: None,
            boost_tick: None,
            state: FlightState::Startup,
            state_ticks: Vec::new(),
            ground_pressure: None,
            ground_samples: 0,
            raw_altitude: Vec::new(),
            filtered_altitude: Track::without_max(),
            height: MeasuredOrComputed::new(),
            height_track: Track::new(),
            speed: MeasuredOrComputed::new(),
            speed_track: Track::new(),
            acceleration: MeasuredOrComputed::new(),
            accel_track: Track::new(),
            motor_pressure: Track::new(),
            integrated_speed: None,
            last_accel: None,
            orientation: None,
            last_gyro_time: None,
            last_gyro_rate: None,
            gps: None,
            gps_in_progress: None,
            gps_ground_altitude: None,
            voltages: Voltages::default(),
            pyro_fired: 0,
            companion: None,
            series: Vec::new(),
        }
    }

    /// A tracker matched to a device's sample rate and mounting.
    pub fn from_calibration(calibration: &CalibrationContext) -> Self {
        let mut tracker = Self::new();
        tracker.ticks_per_sec = calibration
            .ticks_per_sec
            .unwrap_or(DEFAULT_TICKS_PER_SEC);
        tracker.accel_inverted = calibration.pad_orientation.accel_inverted();
        tracker
    }

    // ---- time bases ----

    /// Stable internal time: seconds since the first tick seen.
    fn sample_time(&self) -> Option<f64> {
        Some((self.tick? - self.first_tick?) as f64 / self.ticks_per_sec)
    }

    fn flight_time_for_tick(&self, tick: u64) -> Option<f64> {
        let origin = self.boost_tick.or(self.first_tick)?;
        Some((tick as i64 - origin as i64) as f64 / self.ticks_per_sec)
    }

    /// Flight-relative time of the latest sample, boost-origin once boost
    /// has been seen.
    pub fn time(&self) -> Option<f64> {
        self.flight_time_for_tick(self.tick?)
    }

    // ---- derived values ----

    pub fn state(&self) -> FlightState {
        self.state
    }

    fn ground_altitude(&self) -> Option<f64> {
        Some(pressure_to_altitude(self.ground_pressure?))
    }

    fn gps_height(&self) -> Option<f64> {
        Some(self.gps.as_ref()?.altitude? - self.gps_ground_altitude?)
    }

    /// Height above pad: filtered barometric height, else the Kalman
    /// estimate, else GPS altitude against the GPS ground reference.
    pub fn height(&self) -> Option<f64> {
        self.height.get().or_else(|| self.gps_height())
    }

    /// Vertical speed: Kalman estimate, else the phase-dependent blend of
    /// integrated acceleration (ascent) and differentiated filtered
    /// altitude (everything after).
    pub fn speed(&self) -> Option<f64> {
        self.speed.get()
    }

    /// Flight-axis acceleration: the direct sample, else the Kalman
    /// estimate.
    pub fn acceleration(&self) -> Option<f64> {
        self.acceleration.get()
    }

    pub fn max_height(&self) -> Option<f64> {
        self.height_track.max()
    }

    pub fn max_speed(&self) -> Option<f64> {
        self.speed_track.max()
    }

    pub fn max_acceleration(&self) -> Option<f64> {
        self.accel_track.max()
    }

    /// Orientation tilt from pad vertical in degrees, once initialized
    /// from a pad accelerometer vector.
    pub fn tilt(&self) -> Option<f64> {
        Some(self.orientation?.tilt())
    }

    pub fn azimuth(&self) -> Option<f64> {
        Some(self.orientation?.azimuth())
    }

    pub fn gps(&self) -> Option<&GpsFix> {
        self.gps.as_ref()
    }

    /// The half-built fix currently accumulating, if any.
    pub fn gps_in_progress(&self) -> Option<&GpsFix> {
        self.gps_in_progress.as_ref()
    }

    pub fn voltages(&self) -> Voltages {
        self.voltages
    }

    pub fn pyro_fired(&self) -> u16 {
        self.pyro_fired
    }

    pub fn motor_pressure(&self) -> Option<f64> {
        self.motor_pressure.value()
    }

    pub fn companion(&self) -> Option<(u16, &[u8])> {
        self.companion.as_ref().map(|(id, data)| (*id, data.as_slice()))
    }

    /// The recorded time series, times re-derived against the final boost
    /// origin.
    pub fn series(&self) -> Vec<FlightSample> {
        self.series
            .iter()
            .filter_map(|&(tick, height, speed, acceleration, state)| {
                Some(FlightSample {
                    time: self.flight_time_for_tick(tick)?,
                    height,
                    speed,
                    acceleration,
                    state,
                })
            })
            .collect()
    }

    pub fn summary(&self) -> FlightSummary {
        FlightSummary {
            max_height: self.max_height(),
            max_speed: self.max_speed(),
            max_acceleration: self.max_acceleration(),
            state_times: self
                .state_ticks
                .iter()
                .filter_map(|&(state, tick)| Some((state, self.flight_time_for_tick(tick)?)))
                .collect(),
        }
    }

    // ---- internals ----

    fn before_flight(&self) -> bool {
        self.boost_tick.is_none() && !self.state.is_flight()
    }

    fn computed_speed(&self) -> Option<f64> {
        if self.state.is_ascent() {
            self.integrated_speed
        } else {
            self.filtered_altitude.rate()
        }
    }

    fn record_sample(&mut self) {
        if let Some(tick) = self.tick {
            self.series.push((
                tick,
                self.height(),
                self.speed(),
                self.acceleration(),
                self.state,
            ));
        }
    }
}

impl FlightDataSink for FlightTracker {
    fn set_tick(&mut self, tick: u64) {
        if self.first_tick.is_none() {
            self.first_tick = Some(tick);
        }
        self.tick = Some(tick);
    }

    fn set_state(&mut self, state: FlightState) {
        if state == self.state {
            return;
        }
        if state == FlightState::Boost && self.boost_tick.is_none() {
            self.boost_tick = self.tick;
        }
        if state.is_ascent() && !self.state.is_ascent() {
            // Start the speed integration fresh at the boost transition
            self.integrated_speed = Some(0.0);
            self.last_accel = None;
        }
        debug!(from = %self.state, to = %state, "flight state transition");
        if let Some(tick) = self.tick {
            self.state_ticks.push((state, tick));
        }
        self.state = state;
    }

    fn set_pressure(&mut self, pressure: f64, _temperature: Option<f64>) {
        let Some(t) = self.sample_time() else {
            return;
        };
        let altitude = pressure_to_altitude(pressure);

        if self.before_flight() {
            // Running pad average; the capped divisor keeps tracking slow
            // weather drift on a long pad wait
            let n = self.ground_samples.min(GROUND_AVERAGE_CAP) as f64;
            let avg = self.ground_pressure.unwrap_or(pressure);
            self.ground_pressure = Some(avg + (pressure - avg) / (n + 1.0));
            self.ground_samples += 1;
        }

        self.raw_altitude.push((t, altitude));
        let width = if self.state.is_ascent() {
            ASCENT_FILTER_WIDTH
        } else {
            DESCENT_FILTER_WIDTH
        };
        let filtered = filter_at(&self.raw_altitude, self.raw_altitude.len() - 1, width);
        self.filtered_altitude.set(filtered, t);

        if let Some(ground) = self.ground_altitude() {
            let height = filtered - ground;
            self.height.set_measured(height);
            self.height_track.set(height, t);
        }
        if let Some(speed) = self.computed_speed() {
            self.speed.set_computed(speed);
            self.speed_track.set(speed, t);
        }
        self.record_sample();
    }

    fn set_acceleration(&mut self, accel: f64) {
        let Some(t) = self.sample_time() else {
            return;
        };
        let accel = accel.clamp(-MAX_ACCEL, MAX_ACCEL);
        self.acceleration.set_measured(accel);
        self.accel_track.set(accel, t);

        // A tilted airframe spends part of its thrust sideways; only the
        // vertical component builds vertical speed
        let vertical = match self.orientation {
            Some(orientation) => accel * orientation.tilt().to_radians().cos(),
            None => accel,
        };
        if self.state.is_ascent() {
            if let Some((pt, pa)) = self.last_accel {
                let dt = t - pt;
                if dt > 0.0 {
                    let speed = self.integrated_speed.unwrap_or(0.0) + 0.5 * (pa + vertical) * dt;
                    self.integrated_speed = Some(speed);
                    self.speed.set_computed(speed);
                    self.speed_track.set(speed, t);
                }
            }
        }
        self.last_accel = Some((t, vertical));
    }

    fn set_accel_vector(&mut self, accel: [f64; 3]) {
        // The pad is the only place the accelerometer measures pure
        // gravity, so orientation (re-)initializes only there
        if self.before_flight() {
            if let Some(rotation) = Rotation::from_acceleration(accel, self.accel_inverted) {
                self.orientation = Some(rotation);
            }
        }
    }

    fn set_gyro(&mut self, rate: [f64; 3]) {
        let Some(t) = self.sample_time() else {
            return;
        };
        let in_flight = !self.before_flight();
        let mut rate = rate;
        if let (Some(pt), Some(previous)) = (self.last_gyro_time, self.last_gyro_rate) {
            let dt = t - pt;
            if dt > 0.0 {
                // A rate step implying angular acceleration past the limit
                // is noise; hold the change to the limit
                let max_delta = MAX_ANGULAR_ACCEL * dt;
                for (r, p) in rate.iter_mut().zip(previous) {
                    *r = r.clamp(p - max_delta, p + max_delta);
                }
                if in_flight {
                    if let Some(rotation) = self.orientation.as_mut() {
                        rotation.rotate(dt, rate);
                    }
                }
            }
        }
        self.last_gyro_time = Some(t);
        self.last_gyro_rate = Some(rate);
    }

    fn set_gps(&mut self, fix: GpsFix) {
        if self.before_flight() {
            if let Some(altitude) = fix.altitude {
                self.gps_ground_altitude = Some(altitude);
            }
        }
        self.gps_in_progress = None;
        self.gps = Some(fix);
    }

    fn set_gps_partial(&mut self, fix: &GpsFix) {
        self.gps_in_progress = Some(fix.clone());
    }

    fn set_voltages(&mut self, voltages: Voltages) {
        if voltages.battery.is_some() {
            self.voltages.battery = voltages.battery;
        }
        if voltages.apogee.is_some() {
            self.voltages.apogee = voltages.apogee;
        }
        if voltages.main.is_some() {
            self.voltages.main = voltages.main;
        }
    }

    fn set_pyro_fired(&mut self, channels: u16) {
        self.pyro_fired = channels;
    }

    fn set_motor_pressure(&mut self, pressure: f64) {
        if let Some(t) = self.sample_time() {
            self.motor_pressure.set(pressure, t);
        }
    }

    fn set_companion(&mut self, board_id: u16, data: &[u8]) {
        self.companion = Some((board_id, data.to_vec()));
    }

    fn set_kalman(&mut self, height: f64, speed: f64, accel: f64) {
        self.height.set_computed(height);
        self.speed.set_measured(speed);
        self.acceleration.set_computed(accel);
        if let Some(t) = self.sample_time() {
            self.height_track.set(height, t);
            self.speed_track.set(speed, t);
        }
    }
}
