//! Events flowing out of the board and inputs flowing into it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::pins::{PinId, PinKind};

/// The two physical buttons plus their chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ButtonId {
    A,
    B,
    AB,
}

impl ButtonId {
    pub const ALL: [ButtonId; 3] = [ButtonId::A, ButtonId::B, ButtonId::AB];

    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonId::A => "A",
            ButtonId::B => "B",
            ButtonId::AB => "AB",
        }
    }
}

impl FromStr for ButtonId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(ButtonId::A),
            "B" => Ok(ButtonId::B),
            "AB" | "A+B" => Ok(ButtonId::AB),
            other => Err(format!("unknown button '{}'", other)),
        }
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware state change published on the event hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BoardEvent {
    PinChange {
        pin: PinId,
        value: u16,
        kind: PinKind,
    },
    LedChange {
        x: usize,
        y: usize,
        value: u8,
    },
    ButtonPress {
        button: ButtonId,
    },
    ButtonRelease {
        button: ButtonId,
    },
    LogoTouch {
        pressed: bool,
    },
    Gesture {
        name: String,
    },
    Reset {},
    #[serde(rename_all = "camelCase")]
    UltrasonicTrigger {
        sensor_id: String,
        trig_pin: PinId,
        echo_pin: PinId,
    },
}

impl BoardEvent {
    /// The wire name of this event (`"pin-change"`, `"reset"`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            BoardEvent::PinChange { .. } => "pin-change",
            BoardEvent::LedChange { .. } => "led-change",
            BoardEvent::ButtonPress { .. } => "button-press",
            BoardEvent::ButtonRelease { .. } => "button-release",
            BoardEvent::LogoTouch { .. } => "logo-touch",
            BoardEvent::Gesture { .. } => "gesture",
            BoardEvent::Reset {} => "reset",
            BoardEvent::UltrasonicTrigger { .. } => "ultrasonic-trigger",
        }
    }
}

/// Stimulus injected by the host or the circuit canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InputEvent {
    Button { button: ButtonId, pressed: bool },
    Logo { pressed: bool },
    Gesture { name: String },
    LightLevel { level: u8 },
    Temperature { celsius: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = BoardEvent::PinChange {
            pin: "P1".parse().unwrap(),
            value: 1,
            kind: PinKind::Digital,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "pin-change", "pin": "P1", "value": 1, "kind": "digital"})
        );

        let reset = serde_json::to_value(BoardEvent::Reset {}).unwrap();
        assert_eq!(reset, serde_json::json!({"type": "reset"}));
    }

    #[test]
    fn test_ultrasonic_event_uses_camel_case_fields() {
        let event = BoardEvent::UltrasonicTrigger {
            sensor_id: "sonar-1".into(),
            trig_pin: "P1".parse().unwrap(),
            echo_pin: "P2".parse().unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ultrasonic-trigger");
        assert_eq!(json["sensorId"], "sonar-1");
        assert_eq!(json["trigPin"], "P1");
        assert_eq!(json["echoPin"], "P2");
        assert_eq!(event.kind(), "ultrasonic-trigger");
    }

    #[test]
    fn test_input_event_from_json() {
        let event: InputEvent =
            serde_json::from_str(r#"{"type":"button","button":"AB","pressed":true}"#).unwrap();
        assert_eq!(
            event,
            InputEvent::Button {
                button: ButtonId::AB,
                pressed: true
            }
        );
    }

    #[test]
    fn test_button_parsing() {
        assert_eq!("a".parse::<ButtonId>().unwrap(), ButtonId::A);
        assert_eq!("A+B".parse::<ButtonId>().unwrap(), ButtonId::AB);
        assert!("C".parse::<ButtonId>().is_err());
    }
}
