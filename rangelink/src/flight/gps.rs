//! GPS fix assembly.
//!
//! Field-split log families spread one fix over several records (latitude,
//! longitude, altitude, time, date, satellite count may all arrive
//! separately). A [`PendingFix`] accumulates fields and publishes the fix
//! atomically on the flush rule: the next non-GPS record, or immediately for
//! atomic formats. A published fix is never partially overwritten - a later
//! GPS field record starts a new pending fix.

use chrono::NaiveDate;

/// One GPS fix, possibly incomplete.
///
/// Fields a receiver has not reported are `None`; a fix with any field
/// present is worth publishing (trackers on the pad often see latitude and
/// longitude long before a 3D altitude solution).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpsFix {
    /// Latitude in degrees, north positive.
    pub latitude: Option<f64>,
    /// Longitude in degrees, east positive.
    pub longitude: Option<f64>,
    /// Altitude above sea level in meters.
    pub altitude: Option<f64>,
    /// UTC timestamp, once both date and time of day have arrived.
    pub time: Option<chrono::NaiveDateTime>,
    /// Satellites used in the solution.
    pub nsats: Option<u8>,
    /// Ground course in degrees.
    pub course: Option<f64>,
    /// Ground speed in m/s.
    pub ground_speed: Option<f64>,
}

impl GpsFix {
    /// True once a position (both latitude and longitude) is present.
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// True if any field has been reported.
    pub fn has_any(&self) -> bool {
        self != &Self::default()
    }
}

/// Accumulator for a fix arriving as separate field records.
#[derive(Debug, Default)]
pub struct PendingFix {
    fix: GpsFix,
    date: Option<(i32, u32, u32)>,
    time_of_day: Option<(u32, u32, u32)>,
}

impl PendingFix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latitude(&mut self, degrees: f64) {
        self.fix.latitude = Some(degrees);
    }

    pub fn set_longitude(&mut self, degrees: f64) {
        self.fix.longitude = Some(degrees);
    }

    pub fn set_altitude(&mut self, meters: f64) {
        self.fix.altitude = Some(meters);
    }

    pub fn set_nsats(&mut self, nsats: u8) {
        self.fix.nsats = Some(nsats);
    }

    pub fn set_time_of_day(&mut self, hour: u32, minute: u32, second: u32) {
        self.time_of_day = Some((hour, minute, second));
    }

    pub fn set_date(&mut self, year: i32, month: u32, day: u32) {
        self.date = Some((year, month, day));
    }

    /// True if any field has accumulated since the last flush.
    pub fn has_data(&self) -> bool {
        self.fix.has_any() || self.date.is_some() || self.time_of_day.is_some()
    }

    /// The in-progress fix as it stands now.
    pub fn snapshot(&self) -> GpsFix {
        let mut fix = self.fix.clone();
        fix.time = self.timestamp();
        fix
    }

    /// Publish the accumulated fix and start a fresh pending one.
    ///
    /// Returns `None` if nothing accumulated; publication is all-or-nothing
    /// so a published fix can never be partially overwritten afterwards.
    pub fn take(&mut self) -> Option<GpsFix> {
        if !self.has_data() {
            return None;
        }
        let fix = self.snapshot();
        *self = Self::default();
        Some(fix)
    }

    fn timestamp(&self) -> Option<chrono::NaiveDateTime> {
        let (year, month, day) = self.date?;
        let (hour, minute, second) = self.time_of_day?;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_then_publishes_once() {
        let mut pending = PendingFix::new();
        pending.set_latitude(43.79);
        pending.set_altitude(1280.0);
        assert!(pending.has_data());

        let fix = pending.take().unwrap();
        assert_eq!(fix.latitude, Some(43.79));
        assert_eq!(fix.altitude, Some(1280.0));
        assert!(fix.longitude.is_none());

        // Nothing left pending after publication
        assert!(!pending.has_data());
        assert!(pending.take().is_none());
    }

    #[test]
    fn test_new_field_after_publish_starts_fresh_fix() {
        let mut pending = PendingFix::new();
        pending.set_latitude(43.79);
        let published = pending.take().unwrap();

        pending.set_longitude(-120.65);
        let second = pending.take().unwrap();
        // The new fix is not an amendment of the published one
        assert!(second.latitude.is_none());
        assert_eq!(second.longitude, Some(-120.65));
        assert_eq!(published.latitude, Some(43.79));
    }

    #[test]
    fn test_timestamp_requires_date_and_time() {
        let mut pending = PendingFix::new();
        pending.set_time_of_day(17, 30, 5);
        assert!(pending.snapshot().time.is_none());
        pending.set_date(2024, 6, 15);
        let time = pending.snapshot().time.unwrap();
        assert_eq!(
            time,
            NaiveDate::from_ymd_opt(2024, 6, 15)
                .unwrap()
                .and_hms_opt(17, 30, 5)
                .unwrap()
        );
    }

    #[test]
    fn test_has_position() {
        let mut fix = GpsFix::default();
        assert!(!fix.has_position());
        fix.latitude = Some(1.0);
        assert!(!fix.has_position());
        fix.longitude = Some(2.0);
        assert!(fix.has_position());
    }
}
