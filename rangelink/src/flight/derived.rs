//! Small building blocks for derived flight values.

/// A time-tagged value with its previous sample and a running maximum.
///
/// The previous sample makes a finite-difference rate available; the
/// maximum can be suppressed for series whose peak is meaningless (raw
/// intermediate values feeding another derivation).
#[derive(Debug, Clone, Copy, Default)]
pub struct Track {
    value: Option<f64>,
    time: Option<f64>,
    previous: Option<f64>,
    previous_time: Option<f64>,
    max: Option<f64>,
    track_max: bool,
}

impl Track {
    /// A track that maintains its running maximum.
    pub fn new() -> Self {
        Self {
            track_max: true,
            ..Self::default()
        }
    }

    /// A track whose maximum is suppressed.
    pub fn without_max() -> Self {
        Self::default()
    }

    /// Record a sample at the given flight-relative time.
    pub fn set(&mut self, value: f64, time: f64) {
        self.previous = self.value;
        self.previous_time = self.time;
        self.value = Some(value);
        self.time = Some(time);
        if self.track_max && self.max.map_or(true, |m| value > m) {
            self.max = Some(value);
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn time(&self) -> Option<f64> {
        self.time
    }

    pub fn previous(&self) -> Option<f64> {
        self.previous
    }

    /// Running maximum, `None` while empty or when suppressed.
    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Finite-difference rate of change per second.
    ///
    /// `None` until two samples at distinct times have been recorded.
    pub fn rate(&self) -> Option<f64> {
        let dv = self.value? - self.previous?;
        let dt = self.time? - self.previous_time?;
        if dt <= 0.0 {
            return None;
        }
        Some(dv / dt)
    }
}

/// A value that can arrive both directly measured and locally computed.
///
/// The accessor is three-way: measured wins, a computed value stands in
/// while no measurement exists, and neither means the value is simply not
/// known yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasuredOrComputed {
    measured: Option<f64>,
    computed: Option<f64>,
}

impl MeasuredOrComputed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_measured(&mut self, value: f64) {
        self.measured = Some(value);
    }

    pub fn set_computed(&mut self, value: f64) {
        self.computed = Some(value);
    }

    /// Measured if present, else computed, else `None`.
    pub fn get(&self) -> Option<f64> {
        self.measured.or(self.computed)
    }

    pub fn is_measured(&self) -> bool {
        self.measured.is_some()
    }
}
