//! Pin identifiers and per-pin state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest value an analog pin can hold (10-bit converter).
pub const ANALOG_MAX: u16 = 1023;

/// Pins exposed on the simulated edge connector.
pub const BOARD_PINS: &[&str] = &[
    "P0", "P1", "P2", "P3", "P4", "P5", "P6", "P7", "P8", "P9", "P10", "P11", "P12", "P13", "P14",
    "P15", "P16", "P19", "P20",
];

/// Identifier of an edge-connector pin, always in canonical `P<n>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PinId(String);

impl PinId {
    /// Build a pin id from its connector number (`0` -> `P0`).
    pub fn from_number(number: i64) -> Result<Self, String> {
        format!("P{}", number).parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Every pin on the connector, in connector order.
    pub fn all() -> impl Iterator<Item = PinId> {
        BOARD_PINS.iter().map(|p| PinId((*p).to_string()))
    }
}

impl FromStr for PinId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        let canonical = if upper.starts_with('P') {
            upper
        } else {
            format!("P{}", upper)
        };
        if BOARD_PINS.contains(&canonical.as_str()) {
            Ok(PinId(canonical))
        } else {
            Err(format!("unknown pin '{}'", trimmed))
        }
    }
}

impl TryFrom<String> for PinId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PinId> for String {
    fn from(pin: PinId) -> Self {
        pin.0
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which half of a pin a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinKind {
    Digital,
    Analog,
}

impl fmt::Display for PinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinKind::Digital => f.write_str("digital"),
            PinKind::Analog => f.write_str("analog"),
        }
    }
}

impl FromStr for PinKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "digital" => Ok(PinKind::Digital),
            "analog" => Ok(PinKind::Analog),
            other => Err(format!("unknown pin kind '{}'", other)),
        }
    }
}

/// Program-visible state of one pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinState {
    /// 0 or 1.
    pub digital: u8,
    /// 0..=1023.
    pub analog: u16,
}

/// A value forced onto a pin by an attached peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalPinValue {
    pub value: u16,
    pub kind: PinKind,
}

impl ExternalPinValue {
    /// Normalize a raw value for the given kind (digital -> 0/1, analog clamped).
    pub fn new(value: i64, kind: PinKind) -> Self {
        let value = match kind {
            PinKind::Digital => u16::from(value != 0),
            PinKind::Analog => value.clamp(0, i64::from(ANALOG_MAX)) as u16,
        };
        Self { value, kind }
    }
}
