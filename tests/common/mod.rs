#![allow(unused_imports, dead_code)]
//! Shared test utilities for integration tests.
//!
//! # Modules
//!
//! - `helpers`: program fixtures and polling helpers
//! - `setup`: an initialized proxy that records everything it is sent

pub mod helpers;
pub mod setup;

pub use helpers::{wait_until, write_program};
pub use setup::{initialized_proxy, Recorded};
