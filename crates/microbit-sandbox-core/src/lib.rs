//! microbit-sandbox core
//!
//! Board simulation engine for learner programs.
//!
//! This crate runs a program written against a small micro:bit-style
//! hardware API on a simulated board, emulating blocking hardware calls with
//! cooperative suspension on a single thread.
//!
//! # Core Modules
//!
//! - [`simulation`]: the [`Simulator`](simulation::Simulator) façade
//! - [`hardware`]: LED matrix, display, buttons, pins, music and sensors
//! - [`transform`]: source rewriting that inserts `await` at blocking calls
//! - [`host`]: runtime bundle loading and program execution
//! - [`script`]: the embedded interpreter
//! - [`event_hub`]: board event fan-out
//! - [`config`]: [`SimulatorConfig`](config::SimulatorConfig)
//!
//! # Example
//!
//! ```ignore
//! use microbit_sandbox_core::{Simulator, SimulatorConfig};
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let sim = Simulator::new(SimulatorConfig::default());
//!     sim.initialize(|line| println!("{line}"), |_| {}, None).await?;
//!     let diagnostic = sim.run("basic.show_string('Hi')").await;
//!     assert!(diagnostic.is_empty());
//!     Ok::<_, anyhow::Error>(())
//! }).await?;
//! ```

#![allow(clippy::type_complexity)]

pub mod config;
pub mod event_hub;
pub mod hardware;
pub mod host;
pub mod script;
pub mod simulation;
pub mod tasks;
pub mod transform;

pub use config::SimulatorConfig;
pub use event_hub::EventHub;
pub use host::{HostError, InterpreterHost};
pub use script::InterruptHandle;
pub use simulation::{Simulator, UltrasonicTrigger};
pub use transform::{transform, transform_with_report, Transformed};
