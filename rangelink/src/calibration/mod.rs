//! Calibration Context - per-flight constants and the flight time base.
//!
//! One [`CalibrationContext`] exists per flight. It holds the per-unit
//! calibration constants discovered incrementally from the device (log
//! header, flight-start record, configuration telemetry) and exposes pure
//! raw-counts to engineering-unit conversions on top of them.
//!
//! # Missing constants
//!
//! A conversion whose constants have not been seen yet returns `None`, never
//! an error and never a fabricated zero. Callers treat `None` as "not yet
//! known" and move on.
//!
//! # Time base
//!
//! Hardware tick counters are 16 bits and wrap every 655 seconds. The
//! context keeps a monotonic wide tick, advanced only through
//! [`CalibrationContext::set_tick`], and derives flight-relative time on
//! demand: relative to the boost tick once boost has been observed, else
//! relative to the first tick seen. Because time is derived rather than
//! stored, latching boost retroactively corrects the times of records
//! ingested before the boost record arrived.

pub mod atmosphere;
pub mod sensor;

pub use atmosphere::{altitude_to_pressure, pressure_to_altitude, GRAVITY};
pub use sensor::{BaroCalibration, BaroSample, ImuModel, MagModel};

/// Default hardware sample rate in ticks per second.
pub const DEFAULT_TICKS_PER_SEC: f64 = 100.0;

/// Backward tick jumps larger than this are treated as 16-bit wraparound.
const TICK_WRAP_SLACK: u64 = 1000;

/// The six named device mountings.
///
/// The accelerometer axis is fixed to the board, so the mounting determines
/// the sign convention of every acceleration sample and of the stored +-g
/// calibration values. Conversions normalize to the canonical antenna-up
/// orientation so flights calibrated on different pads are comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadOrientation {
    #[default]
    AntennaUp,
    AntennaDown,
    PortRailUp,
    StarboardRailUp,
    NoseUp,
    TailUp,
}

impl PadOrientation {
    /// Build from the numeric id used in log headers and config records.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::AntennaUp),
            1 => Some(Self::AntennaDown),
            2 => Some(Self::PortRailUp),
            3 => Some(Self::StarboardRailUp),
            4 => Some(Self::NoseUp),
            5 => Some(Self::TailUp),
            _ => None,
        }
    }

    /// The numeric id used in log headers and config records.
    pub fn id(self) -> u8 {
        match self {
            Self::AntennaUp => 0,
            Self::AntennaDown => 1,
            Self::PortRailUp => 2,
            Self::StarboardRailUp => 3,
            Self::NoseUp => 4,
            Self::TailUp => 5,
        }
    }

    /// The opposite mounting of the same axis pair.
    pub fn opposite(self) -> Self {
        match self {
            Self::AntennaUp => Self::AntennaDown,
            Self::AntennaDown => Self::AntennaUp,
            Self::PortRailUp => Self::StarboardRailUp,
            Self::StarboardRailUp => Self::PortRailUp,
            Self::NoseUp => Self::TailUp,
            Self::TailUp => Self::NoseUp,
        }
    }

    /// Whether the accel axis reads inverted relative to antenna-up.
    pub fn accel_inverted(self) -> bool {
        matches!(
            self,
            Self::AntennaDown | Self::StarboardRailUp | Self::TailUp
        )
    }
}

/// Per-flight calibration constants and monotonic tick state.
///
/// Constructed empty, then filled in from the EEPROM header, the
/// flight-start record, or configuration telemetry as they arrive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationContext {
    /// Device serial number.
    pub serial: Option<u16>,
    /// Log format tag from the header; selects the record family.
    pub log_format: Option<u8>,
    /// Flight number.
    pub flight: Option<u16>,
    /// Hardware sample rate; defaults to [`DEFAULT_TICKS_PER_SEC`].
    pub ticks_per_sec: Option<f64>,

    /// Raw accel reading at +1g, from ground calibration.
    pub accel_plus_g: Option<i32>,
    /// Raw accel reading at -1g, from ground calibration.
    pub accel_minus_g: Option<i32>,
    /// Raw accel reading averaged on the pad before boost.
    pub ground_accel: Option<i32>,
    /// Pad ambient pressure in Pa, averaged before boost.
    pub ground_pressure: Option<f64>,

    /// Barometer factory coefficients.
    pub baro: Option<BaroCalibration>,
    /// IMU model id, for gyro/accel scale factors.
    pub imu_model: ImuModel,
    /// Magnetometer model id.
    pub mag_model: MagModel,
    /// Device mounting on the pad.
    pub pad_orientation: PadOrientation,

    gyro_zero: Option<[i32; 3]>,
    gyro_zero_corrected: bool,

    first_tick: Option<u64>,
    tick: Option<u64>,
    boost_tick: Option<u64>,
}

impl CalibrationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear flight-varying fields without discarding calibration constants.
    ///
    /// Keeps accel +-g calibration, barometer coefficients, model ids, pad
    /// orientation, serial and sample rate. Clears tick state, flight
    /// number, ground references and the gyro zero discovered in-flight.
    pub fn reset(&mut self) {
        self.flight = None;
        self.ground_accel = None;
        self.ground_pressure = None;
        self.gyro_zero = None;
        self.gyro_zero_corrected = false;
        self.first_tick = None;
        self.tick = None;
        self.boost_tick = None;
    }

    // ---- time base ----

    /// Advance the monotonic tick from a raw 16-bit hardware counter.
    ///
    /// The only way tick state advances. Adds multiples of 65536 on a
    /// detected backward jump larger than [`TICK_WRAP_SLACK`], undoing
    /// 16-bit wraparound; small backward jumps (out-of-order records within
    /// a wrap) pass through unchanged. Returns the wide tick.
    pub fn set_tick(&mut self, raw: u16) -> u64 {
        let wide = match self.tick {
            None => raw as u64,
            Some(current) => {
                let mut wide = (current & !0xffff) | raw as u64;
                while wide + TICK_WRAP_SLACK < current {
                    wide += 65536;
                }
                wide
            }
        };
        if self.first_tick.is_none() {
            self.first_tick = Some(wide);
        }
        self.tick = Some(self.tick.unwrap_or(0).max(wide));
        wide
    }

    /// Advance the tick state from an already-repaired wide tick.
    ///
    /// The replay path: decoded logs carry wide ticks from the decoder's
    /// wraparound pass, so re-deriving them here would repeat the repair.
    /// Monotonicity still holds - the latest tick only ever moves forward.
    pub fn set_wide_tick(&mut self, wide: u64) {
        if self.first_tick.is_none() {
            self.first_tick = Some(wide);
        }
        self.tick = Some(self.tick.unwrap_or(0).max(wide));
    }

    /// Latest wide tick observed.
    pub fn tick(&self) -> Option<u64> {
        self.tick
    }

    /// Latch the current tick as the boost tick, once.
    ///
    /// The first entry into boost establishes the flight's time origin;
    /// later calls are ignored.
    pub fn latch_boost(&mut self) {
        if self.boost_tick.is_none() {
            self.boost_tick = self.tick;
        }
    }

    /// The flight's time origin, if boost has been observed.
    pub fn boost_tick(&self) -> Option<u64> {
        self.boost_tick
    }

    /// Flight-relative time of a wide tick, in seconds.
    ///
    /// Relative to the boost tick once boost occurred, else relative to the
    /// first tick seen. `None` before any tick has been observed.
    pub fn time_for_tick(&self, wide: u64) -> Option<f64> {
        let origin = self.boost_tick.or(self.first_tick)?;
        let tps = self.ticks_per_sec.unwrap_or(DEFAULT_TICKS_PER_SEC);
        Some((wide as i64 - origin as i64) as f64 / tps)
    }

    /// Flight-relative time of the latest tick.
    pub fn time(&self) -> Option<f64> {
        self.time_for_tick(self.tick?)
    }

    // ---- acceleration ----

    /// The +1g calibration value normalized to the given orientation.
    pub fn accel_cal_plus(&self, orientation: PadOrientation) -> Option<i32> {
        let (plus, minus) = (self.accel_plus_g?, self.accel_minus_g?);
        Some(if orientation.accel_inverted() {
            -minus
        } else {
            plus
        })
    }

    /// The -1g calibration value normalized to the given orientation.
    pub fn accel_cal_minus(&self, orientation: PadOrientation) -> Option<i32> {
        let (plus, minus) = (self.accel_plus_g?, self.accel_minus_g?);
        Some(if orientation.accel_inverted() {
            -plus
        } else {
            minus
        })
    }

    /// Accelerometer counts per g, from the +-g calibration span.
    pub fn counts_per_g(&self) -> Option<f64> {
        let plus = self.accel_plus_g?;
        let minus = self.accel_minus_g?;
        let span = (plus - minus) as f64 / 4.0;
        if span.abs() < f64::EPSILON {
            return None;
        }
        Some(span)
    }

    /// Convert a raw accel count to m/s^2 along the flight axis.
    ///
    /// Zero-referenced to the pad ground reading, scaled by the calibration
    /// span, sign-normalized for the pad orientation.
    pub fn acceleration(&self, counts: i32) -> Option<f64> {
        let ground = self.ground_accel?;
        let counts_per_g = self.counts_per_g()?;
        let sign = if self.pad_orientation.accel_inverted() {
            -1.0
        } else {
            1.0
        };
        Some(sign * (counts - ground) as f64 / counts_per_g * GRAVITY)
    }

    // ---- barometer ----

    /// Convert raw 24-bit barometer words to a compensated sample.
    pub fn baro_sample(&self, raw_pressure: u32, raw_temperature: u32) -> Option<BaroSample> {
        Some(self.baro?.convert(raw_pressure, raw_temperature))
    }

    /// Convert a legacy 16-bit pressure ADC count to Pa.
    ///
    /// Early hardware reads an analog absolute-pressure sensor through the
    /// ADC; this is the inverse of its ratiometric transfer function.
    pub fn adc_pressure(counts: u16) -> f64 {
        (counts as f64 / 32_767.0 + 0.095) / 0.009 * 1000.0
    }

    /// Pad altitude above sea level, from the ground pressure reference.
    pub fn ground_altitude(&self) -> Option<f64> {
        Some(pressure_to_altitude(self.ground_pressure?))
    }

    /// Height above the pad for an ambient pressure sample.
    pub fn height(&self, pressure: f64) -> Option<f64> {
        Some(pressure_to_altitude(pressure) - self.ground_altitude()?)
    }

    // ---- gyro ----

    /// Set the gyro zero-rate offsets from the flight-start record.
    pub fn set_gyro_zero(&mut self, zero: [i32; 3]) {
        self.gyro_zero = Some(zero);
        self.gyro_zero_corrected = false;
    }

    /// Current gyro zero-rate offsets.
    pub fn gyro_zero(&self) -> Option<[i32; 3]> {
        self.gyro_zero
    }

    /// One-time correction of the stored gyro zero against the first
    /// in-flight sample.
    ///
    /// A firmware defect truncates the stored calibration to 16 bits; the
    /// lost high bits are recovered by shifting each stored zero by the
    /// multiple of 128 that brings it nearest the observed sample. Applied
    /// exactly once; later samples leave the zero untouched.
    pub fn correct_gyro_zero(&mut self, sample: [i32; 3]) {
        if self.gyro_zero_corrected {
            return;
        }
        if let Some(zero) = self.gyro_zero.as_mut() {
            for (z, s) in zero.iter_mut().zip(sample) {
                let steps = (s - *z + 64).div_euclid(128);
                *z += steps * 128;
            }
            self.gyro_zero_corrected = true;
        }
    }

    /// Convert raw gyro counts on one axis to degrees/second.
    pub fn gyro_dps(&self, counts: i32, axis: usize) -> Option<f64> {
        let zero = self.gyro_zero?;
        Some((counts - zero[axis]) as f64 / self.imu_model.gyro_counts_per_dps())
    }

    /// Convert raw magnetometer counts to gauss.
    pub fn mag_gauss(&self, counts: i32) -> f64 {
        counts as f64 / self.mag_model.counts_per_gauss()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_a_context() -> CalibrationContext {
        let mut cal = CalibrationContext::new();
        cal.accel_plus_g = Some(1496);
        cal.accel_minus_g = Some(-1304);
        cal.ground_accel = Some(100);
        cal.ticks_per_sec = Some(100.0);
        cal
    }

    #[test]
    fn test_scenario_a_acceleration() {
        let cal = scenario_a_context();
        let a = cal.acceleration(1196).unwrap();
        assert!((a - 15.36).abs() < 0.01, "got {a}");
        // Ground sample converts to zero
        assert!(cal.acceleration(100).unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_missing_calibration_is_none() {
        let cal = CalibrationContext::new();
        assert!(cal.acceleration(1196).is_none());
        assert!(cal.counts_per_g().is_none());
        assert!(cal.ground_altitude().is_none());
        assert!(cal.gyro_dps(10, 0).is_none());
        assert!(cal.baro_sample(0, 0).is_none());
    }

    #[test]
    fn test_calibration_symmetry() {
        let cal = scenario_a_context();
        for o in [
            PadOrientation::AntennaUp,
            PadOrientation::PortRailUp,
            PadOrientation::NoseUp,
        ] {
            assert_eq!(
                cal.accel_cal_plus(o).unwrap(),
                -cal.accel_cal_minus(o.opposite()).unwrap(),
                "symmetry failed for {o:?}"
            );
            assert_eq!(
                cal.accel_cal_minus(o).unwrap(),
                -cal.accel_cal_plus(o.opposite()).unwrap(),
            );
        }
    }

    #[test]
    fn test_tick_wraparound() {
        let mut cal = CalibrationContext::new();
        assert_eq!(cal.set_tick(65_000), 65_000);
        // Backward jump > 1000: one wrap
        assert_eq!(cal.set_tick(100), 65_636);
        // Small backward jump passes through
        assert_eq!(cal.set_tick(90), 65_626);
        assert_eq!(cal.tick(), Some(65_636));
    }

    #[test]
    fn test_tick_monotonic_over_wrap() {
        let mut cal = CalibrationContext::new();
        let raw = [60_000u16, 63_000, 65_500, 200, 4_000, 10_000];
        let mut last = 0;
        for r in raw {
            let wide = cal.set_tick(r);
            assert!(wide >= last, "wide tick went backward at raw {r}");
            last = wide;
        }
        assert_eq!(last, 65_536 + 10_000);
    }

    #[test]
    fn test_boost_latch_is_retroactive() {
        let mut cal = CalibrationContext::new();
        cal.ticks_per_sec = Some(100.0);
        cal.set_tick(500);
        let early = cal.tick().unwrap();
        // Before boost: relative to first tick
        assert_eq!(cal.time_for_tick(early), Some(0.0));
        cal.set_tick(700);
        cal.latch_boost();
        // After boost latches, the same early tick re-times against boost
        assert_eq!(cal.time_for_tick(early), Some(-2.0));
        assert_eq!(cal.time(), Some(0.0));
        // Second latch is ignored
        cal.set_tick(900);
        cal.latch_boost();
        assert_eq!(cal.boost_tick(), Some(700));
    }

    #[test]
    fn test_gyro_zero_correction_once() {
        let mut cal = CalibrationContext::new();
        cal.set_gyro_zero([100, -50, 0]);
        // First in-flight sample implies the stored zeros lost 128-multiples
        cal.correct_gyro_zero([356, -434, 10]);
        assert_eq!(cal.gyro_zero(), Some([356, -434, 0]));
        // Second call must not move the zero again
        cal.correct_gyro_zero([1000, 1000, 1000]);
        assert_eq!(cal.gyro_zero(), Some([356, -434, 0]));
    }

    #[test]
    fn test_reset_keeps_constants() {
        let mut cal = scenario_a_context();
        cal.serial = Some(1234);
        cal.set_tick(100);
        cal.latch_boost();
        cal.reset();
        assert_eq!(cal.serial, Some(1234));
        assert_eq!(cal.accel_plus_g, Some(1496));
        assert!(cal.ground_accel.is_none());
        assert!(cal.tick().is_none());
        assert!(cal.boost_tick().is_none());
    }

    #[test]
    fn test_pad_orientation_pairs() {
        for id in 0..6 {
            let o = PadOrientation::from_id(id).unwrap();
            assert_eq!(o.opposite().opposite(), o);
            assert_ne!(o.accel_inverted(), o.opposite().accel_inverted());
            assert_eq!(o.id(), id);
        }
        assert!(PadOrientation::from_id(6).is_none());
    }
}
