//! Flight phase enumeration.

use std::fmt;

/// The flight-phase state machine's states, in flight order.
///
/// The ordering is total so phase ranges read naturally: "ascending" is
/// `Boost..=Coast`, "under canopy" is `Drogue..=Main`. The wire numbering
/// used by record payloads and telemetry matches the declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum FlightState {
    #[default]
    Startup = 0,
    Idle = 1,
    Pad = 2,
    Boost = 3,
    Fast = 4,
    Coast = 5,
    Drogue = 6,
    Main = 7,
    Landed = 8,
    Invalid = 9,
    /// Data with no state machine behind it (GPS trackers).
    Stateless = 10,
}

impl FlightState {
    /// Decode the wire number used in records and telemetry.
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => Self::Startup,
            1 => Self::Idle,
            2 => Self::Pad,
            3 => Self::Boost,
            4 => Self::Fast,
            5 => Self::Coast,
            6 => Self::Drogue,
            7 => Self::Main,
            8 => Self::Landed,
            10 => Self::Stateless,
            _ => Self::Invalid,
        }
    }

    /// The wire number for this state.
    pub fn wire(self) -> u8 {
        self as u8
    }

    /// True while the rocket is going up under thrust or momentum.
    pub fn is_ascent(self) -> bool {
        matches!(self, Self::Boost | Self::Fast | Self::Coast)
    }

    /// True once the flight proper has started.
    pub fn is_flight(self) -> bool {
        (Self::Boost..=Self::Landed).contains(&self)
    }

    /// Display name, as printed in summaries and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Idle => "idle",
            Self::Pad => "pad",
            Self::Boost => "boost",
            Self::Fast => "fast",
            Self::Coast => "coast",
            Self::Drogue => "drogue",
            Self::Main => "main",
            Self::Landed => "landed",
            Self::Invalid => "invalid",
            Self::Stateless => "stateless",
        }
    }
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
