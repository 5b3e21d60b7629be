//! The board snapshot handed to hosts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pins::{ExternalPinValue, PinId, PinState};

/// Width and height of the LED matrix.
pub const GRID_SIZE: usize = 5;

/// Brightness of a fully lit LED.
pub const MAX_BRIGHTNESS: u8 = 255;

/// LED brightness indexed `[row][col]`, i.e. `[y][x]`.
pub type LedGrid = [[u8; GRID_SIZE]; GRID_SIZE];

/// Pressed state of the two buttons and their chord.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonStates {
    #[serde(rename = "A")]
    pub a: bool,
    #[serde(rename = "B")]
    pub b: bool,
    #[serde(rename = "AB")]
    pub ab: bool,
}

/// Point-in-time copy of everything the program can observe or change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardState {
    /// Program-written pin values.
    pub pins: BTreeMap<PinId, PinState>,
    pub leds: LedGrid,
    pub buttons: ButtonStates,
    pub logo: bool,
    /// Values forced by attached peripherals; these win on read.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_overrides: BTreeMap<PinId, ExternalPinValue>,
    /// Gestures currently inside their hold window.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gestures: Vec<String>,
    pub light_level: u8,
    pub temperature: i32,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            pins: PinId::all().map(|p| (p, PinState::default())).collect(),
            leds: [[0; GRID_SIZE]; GRID_SIZE],
            buttons: ButtonStates::default(),
            logo: false,
            external_overrides: BTreeMap::new(),
            gestures: Vec::new(),
            light_level: 0,
            temperature: 0,
        }
    }
}

impl BoardState {
    /// True when every LED is dark.
    pub fn display_is_blank(&self) -> bool {
        self.leds.iter().flatten().all(|&b| b == 0)
    }

    /// Render the LED grid as five lines of `#`/`.` (lit/dark).
    pub fn led_picture(&self) -> String {
        self.leds
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&b| if b > 0 { "#" } else { "." })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
