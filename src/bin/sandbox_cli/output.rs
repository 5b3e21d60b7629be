//! Output formatting for microbit-sandbox CLI
//!
//! Provides human-readable and JSON output formatting for all commands.

use serde::Serialize;

use microbit_sandbox::ToneEvent;
use microbit_sandbox_types::{BoardEvent, BoardState, PinState};

/// Format a board snapshot for display
pub fn format_board(state: &BoardState) -> String {
    let mut out = String::new();

    out.push_str("\x1b[1mDisplay:\x1b[0m\n");
    for line in state.led_picture().lines() {
        out.push_str(&format!("  {}\n", line));
    }
    out.push('\n');

    out.push_str(&format!(
        "Buttons: A={} B={} AB={}  Logo: {}\n",
        flag(state.buttons.a),
        flag(state.buttons.b),
        flag(state.buttons.ab),
        flag(state.logo)
    ));
    out.push_str(&format!(
        "Light level: {}  Temperature: {}°C\n",
        state.light_level, state.temperature
    ));
    if !state.gestures.is_empty() {
        out.push_str(&format!("Gestures: {}\n", state.gestures.join(", ")));
    }

    // Only pins that differ from power-on
    let active: Vec<_> = state
        .pins
        .iter()
        .filter(|(_, pin)| **pin != PinState::default())
        .collect();
    if !active.is_empty() {
        out.push_str("\x1b[1mPins:\x1b[0m\n");
        for (id, pin) in active {
            out.push_str(&format!(
                "  {:<4} digital={} analog={}\n",
                id.as_str(),
                pin.digital,
                pin.analog
            ));
        }
    }

    if !state.external_overrides.is_empty() {
        out.push_str("\x1b[1mExternal overrides:\x1b[0m\n");
        for (id, value) in &state.external_overrides {
            out.push_str(&format!("  {:<4} {}={}\n", id.as_str(), value.kind, value.value));
        }
    }

    out
}

fn flag(pressed: bool) -> &'static str {
    if pressed {
        "down"
    } else {
        "up"
    }
}

/// Format a board snapshot as JSON
pub fn format_board_json(state: &BoardState) -> String {
    serde_json::to_string_pretty(state).unwrap_or_else(|_| "{}".to_string())
}

/// One line per board event. LED changes are only shown when `verbose`.
pub fn format_event(event: &BoardEvent, verbose: bool) -> Option<String> {
    let line = match event {
        BoardEvent::LedChange { x, y, value } => {
            if !verbose {
                return None;
            }
            format!("led ({}, {}) = {}", x, y, value)
        }
        BoardEvent::PinChange { pin, value, kind } => {
            format!("pin {} {} = {}", pin, kind, value)
        }
        BoardEvent::ButtonPress { button } => format!("button {} pressed", button),
        BoardEvent::ButtonRelease { button } => format!("button {} released", button),
        BoardEvent::LogoTouch { pressed } => {
            format!("logo {}", if *pressed { "touched" } else { "released" })
        }
        BoardEvent::Gesture { name } => format!("gesture {}", name),
        BoardEvent::Reset {} => "board reset".to_string(),
        BoardEvent::UltrasonicTrigger { sensor_id, .. } => {
            format!("ultrasonic {} triggered", sensor_id)
        }
    };
    Some(format!("\x1b[2m[{}]\x1b[0m {}", event.kind(), line))
}

/// Everything a `run` produced, for `--json`.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub success: bool,
    /// Empty on success, otherwise the program's diagnostic.
    pub diagnostic: String,
    pub output: Vec<String>,
    pub events: Vec<BoardEvent>,
    /// What the audio device was asked to do.
    pub tones: Vec<ToneEvent>,
    pub state: BoardState,
}

pub fn format_run_json(report: &RunReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}

/// Format an error for display
pub fn format_error(error: &anyhow::Error, json_output: bool) -> String {
    if json_output {
        #[derive(Serialize)]
        struct ErrorJson {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            cause: Option<String>,
        }

        let err = ErrorJson {
            error: error.to_string(),
            cause: error.chain().nth(1).map(|e| e.to_string()),
        };
        serde_json::to_string_pretty(&err).unwrap_or_else(|_| "{}".to_string())
    } else {
        let mut out = format!("\x1b[31mError:\x1b[0m {}\n", error);
        let mut causes = error.chain().skip(1).peekable();
        if causes.peek().is_some() {
            out.push_str("Caused by:\n");
            for (idx, cause) in causes.enumerate() {
                out.push_str(&format!("  {}: {}\n", idx + 1, cause));
            }
        }
        out
    }
}
