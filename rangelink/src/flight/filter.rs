//! Kaiser-windowed FIR smoothing for barometric series.
//!
//! Raw barometric altitude is noisy enough that differentiating it for
//! speed needs smoothing first. The window width is phase-dependent: short
//! during ascent where the signal changes fast and lag costs accuracy,
//! long during descent where the drift under canopy is slow and noise
//! dominates.

use std::f64::consts::PI;

/// Window width in seconds while ascending.
pub const ASCENT_FILTER_WIDTH: f64 = 0.5;

/// Window width in seconds while descending or on the ground.
pub const DESCENT_FILTER_WIDTH: f64 = 4.0;

/// Kaiser shape parameter.
const KAISER_BETA: f64 = 2.0 * PI;

/// Modified Bessel function of the first kind, order zero, by power
/// series. Converges quickly for the argument range a Kaiser window
/// produces (0..=beta).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    for k in 1..=30 {
        let f = half / k as f64;
        term *= f * f;
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
    }
    sum
}

/// Kaiser window weight for a sample `t` seconds from the window center.
/// Zero at and beyond the half-width.
fn kaiser_weight(t: f64, half_width: f64) -> f64 {
    let ratio = t / half_width;
    if ratio.abs() >= 1.0 {
        return 0.0;
    }
    bessel_i0(KAISER_BETA * (1.0 - ratio * ratio).sqrt()) / bessel_i0(KAISER_BETA)
}

/// Smooth one sample of a time-ordered `(time, value)` series with a
/// Kaiser-windowed moving average of total width `width` seconds.
///
/// The weighted average is normalized by the weights actually present, so
/// the ends of the series (and sparse stretches) degrade gracefully rather
/// than biasing toward zero.
pub fn filter_at(samples: &[(f64, f64)], index: usize, width: f64) -> f64 {
    let half_width = width / 2.0;
    let center = samples[index].0;
    let mut num = 0.0;
    let mut den = 0.0;

    // The series is time-ordered, so walk outward from the center and
    // stop at the first zero weight on each side.
    for &(t, v) in samples[..=index].iter().rev() {
        let w = kaiser_weight(t - center, half_width);
        if w == 0.0 {
            break;
        }
        num += w * v;
        den += w;
    }
    for &(t, v) in &samples[index + 1..] {
        let w = kaiser_weight(t - center, half_width);
        if w == 0.0 {
            break;
        }
        num += w * v;
        den += w;
    }

    // The center sample always contributes weight 1
    num / den
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64], dt: f64) -> Vec<(f64, f64)> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as f64 * dt, v))
            .collect()
    }

    #[test]
    fn test_constant_series_unchanged() {
        let s = series(&[42.0; 50], 0.01);
        for i in 0..s.len() {
            assert!((filter_at(&s, i, ASCENT_FILTER_WIDTH) - 42.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_spike_attenuated() {
        let mut values = vec![100.0; 101];
        values[50] = 200.0;
        let s = series(&values, 0.01);
        let filtered = filter_at(&s, 50, ASCENT_FILTER_WIDTH);
        // The spike survives but much reduced
        assert!(filtered < 110.0, "spike barely attenuated: {filtered}");
        assert!(filtered > 100.0);
    }

    #[test]
    fn test_samples_outside_window_ignored() {
        // Two clusters 10 seconds apart; filtering within one cluster must
        // not see the other
        let mut s = series(&[0.0; 20], 0.01);
        s.extend((0..20).map(|i| (10.0 + i as f64 * 0.01, 1000.0)));
        let filtered = filter_at(&s, 10, DESCENT_FILTER_WIDTH);
        assert!(filtered.abs() < 1e-9, "distant cluster leaked: {filtered}");
    }

    #[test]
    fn test_window_weights_symmetric() {
        assert!((kaiser_weight(0.1, 1.0) - kaiser_weight(-0.1, 1.0)).abs() < 1e-12);
        assert_eq!(kaiser_weight(1.0, 1.0), 0.0);
        assert!((kaiser_weight(0.0, 1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bessel_i0_known_values() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-12);
        // I0(1) = 1.2660658..., I0(2) = 2.2795853...
        assert!((bessel_i0(1.0) - 1.266_065_877_7).abs() < 1e-9);
        assert!((bessel_i0(2.0) - 2.279_585_302_3).abs() < 1e-9);
    }

    #[test]
    fn test_ramp_tracks_with_short_window() {
        // A linear ramp filters to itself away from the ends
        let s: Vec<(f64, f64)> = (0..200).map(|i| (i as f64 * 0.01, i as f64)).collect();
        let filtered = filter_at(&s, 100, ASCENT_FILTER_WIDTH);
        assert!((filtered - 100.0).abs() < 1e-6);
    }
}
