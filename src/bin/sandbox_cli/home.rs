use std::path::{Path, PathBuf};

use anyhow::Result;
use microbit_sandbox_core::SimulatorConfig;
use tracing::debug;

pub fn sandbox_home() -> PathBuf {
    std::env::var("MICROBIT_SANDBOX_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".microbit-sandbox")
        })
}

/// Load `explicit` if given (it must exist), else the home config if present,
/// else defaults. Environment overrides apply last.
pub fn load_config(explicit: Option<&Path>) -> Result<SimulatorConfig> {
    let config = match explicit {
        Some(path) => SimulatorConfig::from_file(path)?,
        None => {
            let path = sandbox_home().join("config.json");
            debug!(path = %path.display(), "looking for config");
            SimulatorConfig::load_or_default(&path)?
        }
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}
