//! Simulator configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Environment variables override the runtime bundle location:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `MICROBIT_SANDBOX_RUNTIME_PATH` | `runtime.local_path` |
//! | `MICROBIT_SANDBOX_RUNTIME_URL` | `runtime.remote_url` |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const RUNTIME_PATH_ENV: &str = "MICROBIT_SANDBOX_RUNTIME_PATH";
pub const RUNTIME_URL_ENV: &str = "MICROBIT_SANDBOX_RUNTIME_URL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub runtime: RuntimeConfig,
    pub timing: TimingConfig,
    pub ultrasonic: UltrasonicConfig,
    pub environment: EnvironmentConfig,
}

/// Where the interpreter's runtime bundle comes from and what every run sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bundle file tried first. When unset the bundle shipped with the crate is used.
    pub local_path: Option<PathBuf>,
    /// Fallback download location.
    pub remote_url: Option<String>,
    /// Modules star-imported before every program.
    pub auto_import: Vec<String>,
    /// Call depth before `RecursionError`.
    pub max_call_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            local_path: None,
            remote_url: None,
            auto_import: vec!["microbit".to_string()],
            max_call_depth: crate::script::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Board timings, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub gesture_hold_ms: u64,
    pub ms_per_beat: u64,
    /// Delay between two iterations of the forever loop.
    pub forever_tick_ms: u64,
    /// Default delay between two scroll steps of `show_string`.
    pub scroll_interval_ms: u64,
    /// How long a single glyph stays before the display counts as idle.
    pub settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            gesture_hold_ms: 650,
            ms_per_beat: 500,
            forever_tick_ms: 20,
            scroll_interval_ms: 150,
            settle_ms: 400,
        }
    }
}

impl TimingConfig {
    pub fn gesture_hold(&self) -> Duration {
        Duration::from_millis(self.gesture_hold_ms)
    }

    pub fn forever_tick(&self) -> Duration {
        Duration::from_millis(self.forever_tick_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Accepted trigger pulse width for ultrasonic sensors, in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UltrasonicConfig {
    pub min_pulse_us: u64,
    pub max_pulse_us: u64,
}

impl Default for UltrasonicConfig {
    fn default() -> Self {
        Self {
            min_pulse_us: 2,
            max_pulse_us: 100,
        }
    }
}

impl UltrasonicConfig {
    pub fn window(&self) -> std::ops::RangeInclusive<Duration> {
        Duration::from_micros(self.min_pulse_us)..=Duration::from_micros(self.max_pulse_us)
    }
}

/// Ambient readings before any stimulus arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub light_level: u8,
    pub temperature: i32,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            light_level: 127,
            temperature: 21,
        }
    }
}

impl SimulatorConfig {
    /// Load a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: SimulatorConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `MICROBIT_SANDBOX_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(RUNTIME_PATH_ENV) {
            if !path.trim().is_empty() {
                self.runtime.local_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(url) = std::env::var(RUNTIME_URL_ENV) {
            if !url.trim().is_empty() {
                self.runtime.remote_url = Some(url);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ultrasonic.min_pulse_us > self.ultrasonic.max_pulse_us {
            anyhow::bail!(
                "ultrasonic.min_pulse_us ({}) exceeds max_pulse_us ({})",
                self.ultrasonic.min_pulse_us,
                self.ultrasonic.max_pulse_us
            );
        }
        if self.timing.ms_per_beat == 0 {
            anyhow::bail!("timing.ms_per_beat must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: SimulatorConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config, SimulatorConfig::default());
        assert_eq!(config.runtime.auto_import, vec!["microbit"]);
        assert_eq!(config.timing.gesture_hold_ms, 650);
    }

    #[test]
    fn test_partial_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"timing": {{"ms_per_beat": 250}}, "ultrasonic": {{"max_pulse_us": 50}}}}"#
        )
        .expect("write");
        let config = SimulatorConfig::from_file(file.path()).expect("load");
        assert_eq!(config.timing.ms_per_beat, 250);
        assert_eq!(config.timing.forever_tick_ms, 20);
        assert_eq!(config.ultrasonic.max_pulse_us, 50);
        assert_eq!(config.ultrasonic.min_pulse_us, 2);
    }

    #[test]
    fn test_invalid_window_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"ultrasonic": {{"min_pulse_us": 200, "max_pulse_us": 100}}}}"#
        )
        .expect("write");
        assert!(SimulatorConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config =
            SimulatorConfig::load_or_default(&dir.path().join("absent.json")).expect("load");
        assert_eq!(config, SimulatorConfig::default());
    }
}
