//! Orientation tracking by unit-quaternion integration.
//!
//! The orientation starts from the gravity vector measured on the pad,
//! rotated against the reference "up" axis, then composes the quaternion of
//! each gyro sample's Euler increment. Tilt and azimuth read out through
//! closed-form rotation of the reference axes.

/// A quaternion, kept unit-length by the [`Rotation`] wrapper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub r: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        r: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Hamilton product `self * other`.
    pub fn multiply(self, o: Self) -> Self {
        Self {
            r: self.r * o.r - self.x * o.x - self.y * o.y - self.z * o.z,
            x: self.r * o.x + self.x * o.r + self.y * o.z - self.z * o.y,
            y: self.r * o.y - self.x * o.z + self.y * o.r + self.z * o.x,
            z: self.r * o.z + self.x * o.y - self.y * o.x + self.z * o.r,
        }
    }

    pub fn conjugate(self) -> Self {
        Self {
            r: self.r,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    pub fn norm(self) -> f64 {
        (self.r * self.r + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scale back to unit length; a degenerate quaternion becomes identity.
    pub fn normalize(self) -> Self {
        let n = self.norm();
        if n < f64::EPSILON {
            return Self::IDENTITY;
        }
        Self {
            r: self.r / n,
            x: self.x / n,
            y: self.y / n,
            z: self.z / n,
        }
    }

    /// Rotate a vector: `q * (0, v) * q⁻¹`.
    pub fn rotate(self, v: [f64; 3]) -> [f64; 3] {
        let p = Self {
            r: 0.0,
            x: v[0],
            y: v[1],
            z: v[2],
        };
        let out = self.multiply(p).multiply(self.conjugate());
        [out.x, out.y, out.z]
    }

    /// The quaternion of an Euler rotation (radians about x, y, z).
    pub fn euler(x: f64, y: f64, z: f64) -> Self {
        let (sx, cx) = (x / 2.0).sin_cos();
        let (sy, cy) = (y / 2.0).sin_cos();
        let (sz, cz) = (z / 2.0).sin_cos();
        Self {
            r: cx * cy * cz + sx * sy * sz,
            x: sx * cy * cz - cx * sy * sz,
            y: cx * sy * cz + sx * cy * sz,
            z: cx * cy * sz - sx * sy * cz,
        }
    }

    /// The rotation carrying unit vector `a` onto unit vector `b`, by the
    /// half-vector construction.
    pub fn vectors_to_rotation(a: [f64; 3], b: [f64; 3]) -> Self {
        let half = [a[0] + b[0], a[1] + b[1], a[2] + b[2]];
        let n = (half[0] * half[0] + half[1] * half[1] + half[2] * half[2]).sqrt();
        if n < f64::EPSILON {
            // Antiparallel: rotate half a turn about any perpendicular axis
            let axis = if a[0].abs() < 0.9 {
                [0.0, -a[2], a[1]]
            } else {
                [-a[2], 0.0, a[0]]
            };
            let an = (axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2]).sqrt();
            return Self {
                r: 0.0,
                x: axis[0] / an,
                y: axis[1] / an,
                z: axis[2] / an,
            };
        }
        let h = [half[0] / n, half[1] / n, half[2] / n];
        Self {
            r: a[0] * h[0] + a[1] * h[1] + a[2] * h[2],
            x: a[1] * h[2] - a[2] * h[1],
            y: a[2] * h[0] - a[0] * h[2],
            z: a[0] * h[1] - a[1] * h[0],
        }
    }
}

/// Integrated device orientation relative to pad vertical.
#[derive(Debug, Clone, Copy)]
pub struct Rotation {
    q: Quaternion,
}

impl Rotation {
    /// Initialize from the gravity vector measured at rest.
    ///
    /// `inverted` flips the reference up axis for mountings whose flight
    /// axis points down the pad vertical. Returns `None` for a degenerate
    /// (near-zero) acceleration vector.
    pub fn from_acceleration(accel: [f64; 3], inverted: bool) -> Option<Self> {
        let n = (accel[0] * accel[0] + accel[1] * accel[1] + accel[2] * accel[2]).sqrt();
        if n < f64::EPSILON {
            return None;
        }
        let measured = [accel[0] / n, accel[1] / n, accel[2] / n];
        let up = if inverted {
            [0.0, 0.0, -1.0]
        } else {
            [0.0, 0.0, 1.0]
        };
        Some(Self {
            q: Quaternion::vectors_to_rotation(measured, up).normalize(),
        })
    }

    /// Compose one gyro sample: rates in degrees/second over `dt` seconds.
    pub fn rotate(&mut self, dt: f64, rate_dps: [f64; 3]) {
        let scale = dt * std::f64::consts::PI / 180.0;
        let inc = Quaternion::euler(rate_dps[0] * scale, rate_dps[1] * scale, rate_dps[2] * scale);
        self.q = inc.multiply(self.q).normalize();
    }

    /// Tilt from pad vertical, degrees in [0, 180].
    pub fn tilt(&self) -> f64 {
        let v = self.q.rotate([0.0, 0.0, 1.0]);
        v[2].clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Azimuth of the lean direction, degrees in [0, 360).
    pub fn azimuth(&self) -> f64 {
        let v = self.q.rotate([0.0, 0.0, 1.0]);
        let az = v[1].atan2(v[0]).to_degrees();
        if az < 0.0 {
            az + 360.0
        } else {
            az
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "{a} != {b} (tol {tol})");
    }

    #[test]
    fn test_identity_rotates_nothing() {
        let v = Quaternion::IDENTITY.rotate([1.0, 2.0, 3.0]);
        assert_close(v[0], 1.0, 1e-12);
        assert_close(v[1], 2.0, 1e-12);
        assert_close(v[2], 3.0, 1e-12);
    }

    #[test]
    fn test_euler_quarter_turn() {
        // Right-handed 90 degrees about +x: +y to +z, +z to -y
        let q = Quaternion::euler(std::f64::consts::FRAC_PI_2, 0.0, 0.0);
        let v = q.rotate([0.0, 0.0, 1.0]);
        assert_close(v[0], 0.0, 1e-12);
        assert_close(v[1], -1.0, 1e-12);
        assert_close(v[2], 0.0, 1e-12);
    }

    #[test]
    fn test_vectors_to_rotation_maps_a_to_b() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 0.0, 1.0];
        let q = Quaternion::vectors_to_rotation(a, b);
        let v = q.rotate(a);
        assert_close(v[0], b[0], 1e-12);
        assert_close(v[1], b[1], 1e-12);
        assert_close(v[2], b[2], 1e-12);
    }

    #[test]
    fn test_vectors_to_rotation_antiparallel() {
        let a = [0.0, 0.0, 1.0];
        let b = [0.0, 0.0, -1.0];
        let v = Quaternion::vectors_to_rotation(a, b).rotate(a);
        assert_close(v[2], -1.0, 1e-12);
    }

    #[test]
    fn test_upright_pad_has_zero_tilt() {
        let r = Rotation::from_acceleration([0.0, 0.0, 9.8], false).unwrap();
        assert_close(r.tilt(), 0.0, 1e-9);
    }

    #[test]
    fn test_inverted_mounting_is_also_upright() {
        let r = Rotation::from_acceleration([0.0, 0.0, -9.8], true).unwrap();
        assert_close(r.tilt(), 0.0, 1e-9);
    }

    #[test]
    fn test_integrated_rotation_accumulates_tilt() {
        let mut r = Rotation::from_acceleration([0.0, 0.0, 9.8], false).unwrap();
        // 45 degrees/second about x for 1 second, in 100 steps
        for _ in 0..100 {
            r.rotate(0.01, [45.0, 0.0, 0.0]);
        }
        assert_close(r.tilt(), 45.0, 0.01);
    }

    #[test]
    fn test_small_increments_match_one_large() {
        let mut stepped = Rotation::from_acceleration([0.0, 0.0, 1.0], false).unwrap();
        let mut single = stepped;
        for _ in 0..1000 {
            stepped.rotate(0.001, [0.0, 30.0, 0.0]);
        }
        single.rotate(1.0, [0.0, 30.0, 0.0]);
        assert_close(stepped.tilt(), single.tilt(), 1e-6);
    }

    #[test]
    fn test_degenerate_accel_rejected() {
        assert!(Rotation::from_acceleration([0.0, 0.0, 0.0], false).is_none());
    }
}
