//! microbit-sandbox
//!
//! Runs learner programs on a simulated micro:bit-style board, isolated on a
//! worker thread:
//!
//! - **Boundary proxy**: [`SimulatorProxy`](proxy::SimulatorProxy) exposes the
//!   simulator façade as `Send` async calls to an isolated worker
//! - **Audio relay**: [`AudioRelay`](audio::AudioRelay) owns the only tone
//!   device on the host side and serializes tones
//!
//! The board itself (hardware modules, source transformer, interpreter) lives
//! in [`microbit_sandbox_core`].

#![allow(clippy::type_complexity)]

pub mod audio;
pub mod proxy;

pub use microbit_sandbox_core;
pub use microbit_sandbox_types;

pub use audio::{AudioRelay, RecordingOutput, ToneEvent, ToneOutput, DEFAULT_MS_PER_BEAT};
pub use proxy::{ProxyError, SimulatorProxy};
