//! Shared types for the microbit-sandbox workspace.
//!
//! This crate holds the serializable vocabulary spoken between the simulated
//! board, the isolated worker, and whoever hosts the simulator:
//!
//! - [`pins`]: pin identifiers and per-pin state
//! - [`board`]: the [`BoardState`](board::BoardState) snapshot
//! - [`events`]: outward [`BoardEvent`](events::BoardEvent)s and injected
//!   [`InputEvent`](events::InputEvent)s
//! - [`audio`]: the fixed [`AudioCommand`](audio::AudioCommand) vocabulary

pub mod audio;
pub mod board;
pub mod events;
pub mod pins;

pub use audio::AudioCommand;
pub use board::{BoardState, ButtonStates, LedGrid, GRID_SIZE, MAX_BRIGHTNESS};
pub use events::{BoardEvent, ButtonId, InputEvent};
pub use pins::{ExternalPinValue, PinId, PinKind, PinState, ANALOG_MAX, BOARD_PINS};
