//! CLI subcommand implementations for microbit-sandbox

pub mod home;
pub mod output;
pub mod run;
pub mod state;
pub mod transform;
