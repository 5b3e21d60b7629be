//! Run command - execute a program on the simulated board

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

use super::output::{format_board, format_error, format_event, format_run_json, RunReport};
use microbit_sandbox::{AudioRelay, RecordingOutput, SimulatorProxy, ToneEvent};
use microbit_sandbox_core::SimulatorConfig;
use microbit_sandbox_types::{BoardEvent, ButtonId, InputEvent};

/// How long a `--press` keeps the button down.
const PRESS_HOLD: Duration = Duration::from_millis(100);

/// Worker traffic is delivered by the proxy's pump; let it drain before reporting.
const FLUSH_GRACE: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Program file
    pub file: PathBuf,

    /// Keep the board running this long (from program start) so handlers
    /// and the forever loop can act
    #[arg(long, default_value = "0")]
    pub duration_ms: u64,

    /// Press a button at an offset from program start, e.g. `A@500` or `AB@1200`
    #[arg(long = "press", value_parser = parse_press)]
    pub presses: Vec<Press>,
}

/// A scheduled button press.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Press {
    pub button: ButtonId,
    pub at_ms: u64,
}

fn parse_press(arg: &str) -> Result<Press, String> {
    let (button, at) = arg
        .split_once('@')
        .ok_or_else(|| format!("expected BUTTON@MILLIS, got '{}'", arg))?;
    let button = button.trim().parse::<ButtonId>()?;
    let at_ms = at
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid offset '{}': {}", at, e))?;
    Ok(Press { button, at_ms })
}

#[derive(Default)]
struct Collected {
    output: Vec<String>,
    events: Vec<BoardEvent>,
}

impl RunCmd {
    pub async fn execute(&self, config: SimulatorConfig, json_output: bool, verbose: bool) -> Result<()> {
        match self.execute_inner(config, json_output, verbose).await {
            Ok(report) => {
                if json_output {
                    println!("{}", format_run_json(&report));
                } else {
                    if verbose && !report.tones.is_empty() {
                        println!("\x1b[1mTones:\x1b[0m {}", format_tones(&report.tones));
                    }
                    if !report.success {
                        eprintln!("\x1b[31m{}\x1b[0m", report.diagnostic);
                    }
                    println!("{}", format_board(&report.state));
                }

                if report.success {
                    Ok(())
                } else {
                    Err(anyhow!(report.diagnostic))
                }
            }
            Err(e) => {
                eprintln!("{}", format_error(&e, json_output));
                Err(e)
            }
        }
    }

    async fn execute_inner(
        &self,
        config: SimulatorConfig,
        json_output: bool,
        verbose: bool,
    ) -> Result<RunReport> {
        let source = std::fs::read_to_string(&self.file)
            .with_context(|| format!("Failed to read program {}", self.file.display()))?;

        let tones = RecordingOutput::new();
        let relay = AudioRelay::new(tones.clone(), config.timing.ms_per_beat);
        let proxy = Arc::new(SimulatorProxy::new(config)?);

        let collected = Arc::new(Mutex::new(Collected::default()));
        let output = collected.clone();
        let events = collected.clone();
        proxy
            .initialize(
                move |line| {
                    if !json_output {
                        println!("{}", line);
                    }
                    output.lock().output.push(line.to_string());
                },
                move |event| {
                    if !json_output {
                        if let Some(line) = format_event(event, verbose) {
                            println!("{}", line);
                        }
                    }
                    events.lock().events.push(event.clone());
                },
                Some(relay),
            )
            .await
            .context("Failed to initialize simulator")?;

        let start = Instant::now();
        let schedule = self.schedule_presses(&proxy, start);
        let diagnostic = proxy.run(&source).await?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "program returned");

        sleep_until(start + Duration::from_millis(self.duration_ms)).await;
        for task in schedule {
            task.abort();
        }
        let state = proxy.get_states().await?;
        sleep(FLUSH_GRACE).await;

        let collected = std::mem::take(&mut *collected.lock());
        Ok(RunReport {
            success: diagnostic.is_empty(),
            diagnostic,
            output: collected.output,
            events: collected.events,
            tones: tones.events(),
            state,
        })
    }

    fn schedule_presses(
        &self,
        proxy: &Arc<SimulatorProxy>,
        start: Instant,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        self.presses
            .iter()
            .map(|press| {
                let proxy = proxy.clone();
                let press = *press;
                tokio::spawn(async move {
                    sleep_until(start + Duration::from_millis(press.at_ms)).await;
                    for pressed in [true, false] {
                        let event = InputEvent::Button {
                            button: press.button,
                            pressed,
                        };
                        if let Err(e) = proxy.simulate_input(event).await {
                            debug!(error = %e, "scheduled press failed");
                            return;
                        }
                        if pressed {
                            sleep(PRESS_HOLD).await;
                        }
                    }
                })
            })
            .collect()
    }
}

fn format_tones(tones: &[ToneEvent]) -> String {
    tones
        .iter()
        .map(|tone| match tone {
            ToneEvent::Start(frequency) => format!("{} Hz", frequency),
            ToneEvent::Stop => "stop".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_press() {
        assert_eq!(
            parse_press("A@500"),
            Ok(Press {
                button: ButtonId::A,
                at_ms: 500
            })
        );
        assert_eq!(parse_press("ab@0").map(|p| p.button), Ok(ButtonId::AB));
        assert!(parse_press("A").is_err());
        assert!(parse_press("C@10").is_err());
        assert!(parse_press("B@soon").is_err());
    }
}
