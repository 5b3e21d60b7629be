//! State command - print the board as a freshly initialized simulator sees it

use anyhow::{Context, Result};
use clap::Parser;

use super::output::{format_board, format_board_json};
use microbit_sandbox::SimulatorProxy;
use microbit_sandbox_core::SimulatorConfig;
use microbit_sandbox_types::InputEvent;

#[derive(Parser, Debug)]
pub struct StateCmd {
    /// Ambient light level (0-255) to apply before the snapshot
    #[arg(long)]
    pub light_level: Option<u8>,

    /// Temperature in °C to apply before the snapshot
    #[arg(long, allow_hyphen_values = true)]
    pub temperature: Option<i32>,
}

impl StateCmd {
    pub async fn execute(&self, config: SimulatorConfig, json_output: bool) -> Result<()> {
        let proxy = SimulatorProxy::new(config)?;
        proxy
            .initialize(|_| {}, |_| {}, None)
            .await
            .context("Failed to initialize simulator")?;

        if let Some(level) = self.light_level {
            proxy.simulate_input(InputEvent::LightLevel { level }).await?;
        }
        if let Some(celsius) = self.temperature {
            proxy
                .simulate_input(InputEvent::Temperature { celsius })
                .await?;
        }

        let state = proxy.get_states().await?;
        if json_output {
            println!("{}", format_board_json(&state));
        } else {
            println!("{}", format_board(&state));
        }
        Ok(())
    }
}
