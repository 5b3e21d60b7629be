//! The simulation façade: one board, one interpreter host, one program at a time.
//!
//! Everything here is single-threaded and must be driven from inside a tokio
//! `LocalSet`. Program tasks (the running program, its handlers, the forever
//! loop) are tracked so a reset can cancel them together.

pub mod ultrasonic;

use std::cell::Cell;
use std::rc::Rc;

use anyhow::{bail, Result};
use microbit_sandbox_types::{BoardEvent, BoardState, ExternalPinValue, InputEvent, PinId, PinKind};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::config::SimulatorConfig;
use crate::event_hub::SubscriptionId;
use crate::hardware::{AudioSink, Board};
use crate::host::{sources_from_config, BundleSource, HostError, InterpreterHost};
use crate::script::{InterruptHandle, OutputSink};
use crate::tasks::TaskScope;

pub use ultrasonic::{TriggerCallback, UltrasonicRegistry, UltrasonicTrigger};

/// Name under which the board API is importable.
pub const BOARD_MODULE: &str = "microbit";

pub struct Simulator {
    config: SimulatorConfig,
    tasks: Rc<TaskScope>,
    board: Board,
    host: Rc<InterpreterHost>,
    ultrasonic: Rc<UltrasonicRegistry>,
    initialized: Cell<bool>,
    event_subscription: Cell<Option<SubscriptionId>>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let sources = sources_from_config(&config.runtime);
        Self::assemble(config, sources, InterruptHandle::new())
    }

    /// Build a simulator that resolves its runtime from `sources`.
    pub fn with_sources(config: SimulatorConfig, sources: Vec<Box<dyn BundleSource>>) -> Self {
        Self::assemble(config, sources, InterruptHandle::new())
    }

    /// Build a simulator whose programs stop when `interrupt` is raised,
    /// possibly from another thread.
    pub fn with_interrupt(config: SimulatorConfig, interrupt: InterruptHandle) -> Self {
        let sources = sources_from_config(&config.runtime);
        Self::assemble(config, sources, interrupt)
    }

    fn assemble(
        config: SimulatorConfig,
        sources: Vec<Box<dyn BundleSource>>,
        interrupt: InterruptHandle,
    ) -> Self {
        let tasks = Rc::new(TaskScope::new());
        let board = Board::new(&config, tasks.clone());
        let host = InterpreterHost::with_sources(config.runtime.clone(), sources)
            .with_interrupt(interrupt);
        let ultrasonic = UltrasonicRegistry::new(config.ultrasonic.window(), board.hub.clone());

        let registry = ultrasonic.clone();
        board.pins.add_listener(move |write| registry.on_pin_write(write));

        Self {
            config,
            tasks,
            board,
            host: Rc::new(host),
            ultrasonic,
            initialized: Cell::new(false),
            event_subscription: Cell::new(None),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.host.interrupt_handle()
    }

    /// Load the runtime, wire callbacks and the board module, then reset.
    ///
    /// Calling it again replaces the callbacks.
    pub async fn initialize(
        &self,
        on_output: impl Fn(&str) + 'static,
        on_event: impl Fn(&BoardEvent) + 'static,
        on_audio: Option<Rc<dyn AudioSink>>,
    ) -> Result<(), HostError> {
        self.host.initialize().await?;

        let output: OutputSink = Rc::new(on_output);
        self.host.set_output_callback(output.clone());
        self.board.reporter.attach(output);

        let tasks = self.tasks.clone();
        self.host.set_spawner(Rc::new(move |work| {
            tasks.spawn(work);
        }));
        self.host
            .register_hardware_module(BOARD_MODULE, self.board.surface_module(BOARD_MODULE));

        if let Some(previous) = self.event_subscription.take() {
            self.board.hub.unsubscribe(previous);
        }
        self.event_subscription
            .set(Some(self.board.hub.subscribe(on_event)));
        self.board.music.set_sink(on_audio);

        self.initialized.set(true);
        self.reset();
        info!(
            runtime = %self.host.runtime_version().unwrap_or_default(),
            "simulator initialized"
        );
        Ok(())
    }

    /// Reset transient state and run `source`. Returns `""` on success or a
    /// diagnostic. Handlers and the forever loop keep running afterwards.
    pub async fn run(&self, source: &str) -> String {
        if !self.is_initialized() {
            return "RuntimeError: simulator is not initialized".to_string();
        }
        self.reset();
        let host = self.host.clone();
        let source = source.to_string();
        let program = self.tasks.spawn(async move { host.run(&source).await });
        match program.await {
            Ok(diagnostic) => diagnostic,
            Err(e) if e.is_cancelled() => {
                debug!("program cancelled by reset");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "program task failed");
                format!("RuntimeError: {}", panic_message(e))
            }
        }
    }

    /// Cancel program tasks and return the board to power-on state.
    /// Sensor bindings and external pin overrides are kept.
    pub fn reset(&self) {
        self.tasks.abort_all();
        self.host.reset();
        self.board.hub.emit(BoardEvent::Reset {});
    }

    pub fn get_states(&self) -> BoardState {
        self.board.snapshot()
    }

    /// Feed a stimulus to the board. Handlers it triggers run as program tasks.
    pub fn simulate_input(&self, event: InputEvent) -> Result<()> {
        if !self.is_initialized() {
            bail!("simulator is not initialized");
        }
        debug!(?event, "input");
        match event {
            InputEvent::Button { button, pressed } => {
                if pressed {
                    self.tasks.spawn(self.board.buttons.press(button));
                } else {
                    self.board.buttons.release(button);
                }
            }
            InputEvent::Logo { pressed } => {
                self.tasks.spawn(self.board.logo.touch(pressed));
            }
            InputEvent::Gesture { name } => match self.board.gesture.trigger(&name) {
                Ok(handlers) => {
                    self.tasks.spawn(handlers);
                }
                Err(e) => bail!(e),
            },
            InputEvent::LightLevel { level } => self.board.environment.set_light_level(level),
            InputEvent::Temperature { celsius } => self.board.environment.set_temperature(celsius),
        }
        Ok(())
    }

    pub fn register_ultrasonic_sensor(
        &self,
        sensor_id: &str,
        trig_pin: PinId,
        echo_pin: PinId,
        on_trigger: impl Fn(&UltrasonicTrigger) + 'static,
    ) {
        self.ultrasonic
            .register(sensor_id, trig_pin, echo_pin, Rc::new(on_trigger));
    }

    pub fn unregister_ultrasonic_sensor(&self, sensor_id: &str) -> bool {
        self.ultrasonic.unregister(sensor_id)
    }

    pub fn ultrasonic(&self) -> &UltrasonicRegistry {
        &self.ultrasonic
    }

    /// Force `pin` to `value`; reads see it until cleared.
    pub fn set_external_pin_value(&self, pin: PinId, value: i64, kind: PinKind) {
        self.board
            .pins
            .set_override(pin, ExternalPinValue::new(value, kind));
    }

    pub fn clear_external_pin_value(&self, pin: &PinId) -> bool {
        self.board.pins.clear_override(pin)
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "program task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panic_message_from_failed_task() {
        let err = tokio::spawn(async { panic!("duration out of range") })
            .await
            .unwrap_err();
        assert_eq!(panic_message(err), "duration out of range");

        let err = tokio::spawn(async { panic!("{} items", 3) }).await.unwrap_err();
        assert_eq!(panic_message(err), "3 items");
    }
}
