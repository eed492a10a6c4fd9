//! Raw sensor conversions parameterized by per-unit constants.
//!
//! The barometric sensor uses a factory-programmed 6-coefficient polynomial
//! (MS5607-style SENS/OFF/TCS/TCO/TREF/TEMPSENS) with a second-order
//! low-temperature correction. IMU and magnetometer scale factors are keyed
//! by the model id reported in the log header.

/// Factory calibration coefficients for the barometric sensor.
///
/// Read from the device PROM and recorded in the flight log header. All six
/// are required; conversion is unavailable without them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaroCalibration {
    /// C1 - pressure sensitivity.
    pub sens: u16,
    /// C2 - pressure offset.
    pub off: u16,
    /// C3 - temperature coefficient of sensitivity.
    pub tcs: u16,
    /// C4 - temperature coefficient of offset.
    pub tco: u16,
    /// C5 - reference temperature.
    pub tref: u16,
    /// C6 - temperature coefficient of temperature.
    pub tempsens: u16,
}

/// One compensated barometer sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaroSample {
    /// Ambient pressure in Pa.
    pub pressure: f64,
    /// Sensor temperature in degrees C.
    pub temperature: f64,
}

impl BaroCalibration {
    /// Convert raw 24-bit pressure and temperature words to engineering units.
    ///
    /// Applies the datasheet first-order polynomial plus the second-order
    /// correction below 20 C (and the additional branch below -15 C).
    pub fn convert(&self, raw_pressure: u32, raw_temperature: u32) -> BaroSample {
        let c1 = self.sens as i64;
        let c2 = self.off as i64;
        let c3 = self.tcs as i64;
        let c4 = self.tco as i64;
        let c5 = self.tref as i64;
        let c6 = self.tempsens as i64;

        let d1 = raw_pressure as i64;
        let d2 = raw_temperature as i64;

        let dt = d2 - (c5 << 8);
        let mut temp = 2000 + ((dt * c6) >> 23);
        let mut off = (c2 << 17) + ((c4 * dt) >> 6);
        let mut sens = (c1 << 16) + ((c3 * dt) >> 7);

        if temp < 2000 {
            let t2 = (dt * dt) >> 31;
            let delta = temp - 2000;
            let mut off2 = (61 * delta * delta) >> 4;
            let mut sens2 = 2 * delta * delta;
            if temp < -1500 {
                let delta = temp + 1500;
                off2 += 15 * delta * delta;
                sens2 += 8 * delta * delta;
            }
            temp -= t2;
            off -= off2;
            sens -= sens2;
        }

        let pressure = ((d1 * sens >> 21) - off) >> 15;
        BaroSample {
            pressure: pressure as f64,
            temperature: temp as f64 / 100.0,
        }
    }
}

/// Inertial measurement unit model, as recorded in the log header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImuModel {
    #[default]
    Mpu6000,
    Mpu9250,
    Bmx160,
}

impl ImuModel {
    /// Build from the header's numeric model id.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0 | 6000 => Some(Self::Mpu6000),
            9250 => Some(Self::Mpu9250),
            160 => Some(Self::Bmx160),
            _ => None,
        }
    }

    /// The canonical numeric model id, as written to log headers.
    pub fn id(self) -> u16 {
        match self {
            Self::Mpu6000 => 6000,
            Self::Mpu9250 => 9250,
            Self::Bmx160 => 160,
        }
    }

    /// Gyro counts per degree/second at the configured full-scale range.
    pub fn gyro_counts_per_dps(self) -> f64 {
        match self {
            Self::Mpu6000 | Self::Mpu9250 => 16.4,
            Self::Bmx160 => 16.38,
        }
    }

    /// Accelerometer counts per g at the configured full-scale range.
    pub fn accel_counts_per_g(self) -> f64 {
        match self {
            Self::Mpu6000 | Self::Mpu9250 => 2048.0,
            Self::Bmx160 => 2048.0,
        }
    }
}

/// Magnetometer model, as recorded in the log header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MagModel {
    #[default]
    Hmc5883,
    Mmc5983,
}

impl MagModel {
    /// Build from the header's numeric model id.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0 | 5883 => Some(Self::Hmc5883),
            5983 => Some(Self::Mmc5983),
            _ => None,
        }
    }

    /// The canonical numeric model id, as written to log headers.
    pub fn id(self) -> u16 {
        match self {
            Self::Hmc5883 => 5883,
            Self::Mmc5983 => 5983,
        }
    }

    /// Counts per gauss.
    pub fn counts_per_gauss(self) -> f64 {
        match self {
            Self::Hmc5883 => 1090.0,
            Self::Mmc5983 => 4096.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Coefficients from the sensor datasheet's worked example.
    fn datasheet_cal() -> BaroCalibration {
        BaroCalibration {
            sens: 46372,
            off: 43981,
            tcs: 29059,
            tco: 27842,
            tref: 31553,
            tempsens: 28165,
        }
    }

    #[test]
    fn test_datasheet_example() {
        let cal = datasheet_cal();
        let sample = cal.convert(6_465_444, 8_077_636);
        // Datasheet: 20.00 C, 1000.09 mbar
        assert!((sample.temperature - 20.0).abs() < 0.1);
        assert!((sample.pressure - 100_009.0).abs() < 50.0);
    }

    #[test]
    fn test_cold_branch_applies() {
        let cal = datasheet_cal();
        // Drive raw temperature low enough to cross the 20 C threshold
        let warm = cal.convert(6_465_444, 8_077_636);
        let cold = cal.convert(6_465_444, 7_500_000);
        assert!(cold.temperature < warm.temperature);
        assert!(cold.temperature < 20.0);
    }

    #[test]
    fn test_imu_model_ids() {
        assert_eq!(ImuModel::from_id(0), Some(ImuModel::Mpu6000));
        assert_eq!(ImuModel::from_id(9250), Some(ImuModel::Mpu9250));
        assert_eq!(ImuModel::from_id(7), None);
    }

    #[test]
    fn test_mag_model_ids() {
        assert_eq!(MagModel::from_id(0), Some(MagModel::Hmc5883));
        assert_eq!(MagModel::from_id(5983), Some(MagModel::Mmc5983));
        assert_eq!(MagModel::from_id(1), None);
    }
}
