//! International Standard Atmosphere model.
//!
//! Implements the 7-layer ISA (piecewise exponential/power-law by altitude
//! band) in both directions. Barometric flight computers report pressure;
//! everything downstream wants altitude, and ground-pressure calibration
//! wants the reverse mapping.
//!
//! Inputs outside the modeled envelope are clamped to it, never extrapolated.

use std::sync::OnceLock;

/// Standard gravity, m/s^2.
pub const GRAVITY: f64 = 9.80665;

/// Sea-level standard pressure, Pa.
pub const SEA_LEVEL_PRESSURE: f64 = 101_325.0;

/// Sea-level standard temperature, K.
const SEA_LEVEL_TEMPERATURE: f64 = 288.15;

/// g0 * M / R for dry air, K/m.
const GMR: f64 = 0.034_163_194_7;

/// Lowest modeled geopotential altitude, m.
pub const MIN_ALTITUDE: f64 = -5_000.0;

/// Highest modeled geopotential altitude, m (top of the mesosphere layer).
pub const MAX_ALTITUDE: f64 = 84_852.0;

/// Base geopotential altitude (m) and lapse rate (K/m) for each ISA layer.
///
/// Layer 0 is extended downward to [`MIN_ALTITUDE`] for below-sea-level
/// launch sites.
const LAYERS: [(f64, f64); 7] = [
    (0.0, -0.0065),
    (11_000.0, 0.0),
    (20_000.0, 0.001),
    (32_000.0, 0.0028),
    (47_000.0, 0.0),
    (51_000.0, -0.0028),
    (71_000.0, -0.002),
];

#[derive(Debug, Clone, Copy)]
struct Layer {
    base_altitude: f64,
    lapse: f64,
    base_temperature: f64,
    base_pressure: f64,
}

/// Layer table with base temperature/pressure propagated up from sea level.
///
/// Derived once rather than hardcoded so the two directions agree to full
/// float precision and the round trip is exact away from the clamps.
fn layers() -> &'static [Layer; 7] {
    static TABLE: OnceLock<[Layer; 7]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [Layer {
            base_altitude: 0.0,
            lapse: 0.0,
            base_temperature: SEA_LEVEL_TEMPERATURE,
            base_pressure: SEA_LEVEL_PRESSURE,
        }; 7];
        let mut temperature = SEA_LEVEL_TEMPERATURE;
        let mut pressure = SEA_LEVEL_PRESSURE;
        for (i, &(base, lapse)) in LAYERS.iter().enumerate() {
            table[i] = Layer {
                base_altitude: base,
                lapse,
                base_temperature: temperature,
                base_pressure: pressure,
            };
            let top = if i + 1 < LAYERS.len() {
                LAYERS[i + 1].0
            } else {
                MAX_ALTITUDE
            };
            pressure = pressure_at(&table[i], top);
            temperature += lapse * (top - base);
        }
        table
    })
}

/// Pressure within a single layer at geopotential altitude `h`.
fn pressure_at(layer: &Layer, h: f64) -> f64 {
    let dh = h - layer.base_altitude;
    if layer.lapse == 0.0 {
        layer.base_pressure * (-GMR * dh / layer.base_temperature).exp()
    } else {
        let ratio = layer.base_temperature / (layer.base_temperature + layer.lapse * dh);
        layer.base_pressure * ratio.powf(GMR / layer.lapse)
    }
}

/// Altitude within a single layer at pressure `p`.
fn altitude_at(layer: &Layer, p: f64) -> f64 {
    if layer.lapse == 0.0 {
        layer.base_altitude - layer.base_temperature / GMR * (p / layer.base_pressure).ln()
    } else {
        let ratio = (layer.base_pressure / p).powf(layer.lapse / GMR);
        layer.base_altitude + layer.base_temperature * (ratio - 1.0) / layer.lapse
    }
}

/// Convert geopotential altitude (m) to ambient pressure (Pa).
///
/// Altitude is clamped to the modeled envelope.
pub fn altitude_to_pressure(altitude: f64) -> f64 {
    let altitude = altitude.clamp(MIN_ALTITUDE, MAX_ALTITUDE);
    let table = layers();
    let layer = table
        .iter()
        .rev()
        .find(|l| altitude >= l.base_altitude)
        .unwrap_or(&table[0]);
    pressure_at(layer, altitude)
}

/// Convert ambient pressure (Pa) to geopotential altitude (m).
///
/// Pressure is clamped to the modeled envelope.
pub fn pressure_to_altitude(pressure: f64) -> f64 {
    let table = layers();
    let max_pressure = pressure_at(&table[0], MIN_ALTITUDE);
    let min_pressure = pressure_at(&table[6], MAX_ALTITUDE);
    let pressure = pressure.clamp(min_pressure, max_pressure);
    // Pressure decreases monotonically with altitude, so scan for the layer
    // whose base pressure is the first at or above the sample.
    let layer = table
        .iter()
        .rev()
        .find(|l| pressure <= l.base_pressure)
        .unwrap_or(&table[0]);
    altitude_at(layer, pressure)
}
