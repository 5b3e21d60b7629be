//! The execution boundary.
//!
//! [`SimulatorProxy`] runs a [`Simulator`] on a dedicated worker thread with
//! its own current-thread tokio runtime and `LocalSet`, and exposes the same
//! operations as `Send` async methods. Every call is a [`WorkerCommand`] over
//! an unbounded channel, answered on a oneshot.
//!
//! Traffic in the other direction (program output, board events, audio
//! commands, ultrasonic triggers) flows back as [`HostMessage`]s and is
//! delivered to the caller's callbacks by a pump task on the caller's runtime.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use futures::future::{self, FutureExt, LocalBoxFuture};
use microbit_sandbox_core::hardware::AudioSink;
use microbit_sandbox_core::{InterruptHandle, Simulator, SimulatorConfig, UltrasonicTrigger};
use microbit_sandbox_types::{AudioCommand, BoardEvent, BoardState, InputEvent, PinId, PinKind};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::audio::AudioRelay;

/// The interpreter recurses on the native stack; give it room.
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(&BoardEvent) + Send + Sync>;
pub type TriggerHandler = Arc<dyn Fn(&UltrasonicTrigger) + Send + Sync>;

/// Errors at the boundary itself. Program failures are not errors here;
/// they come back from [`SimulatorProxy::run`] as diagnostic text.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyError {
    /// Called before a successful [`SimulatorProxy::initialize`].
    NotInitialized,
    /// The worker thread has gone away.
    WorkerGone,
    /// Initialization failed in the worker.
    Initialization { cause: String },
    /// The worker rejected a request.
    Rejected(String),
    /// The worker thread could not be started.
    Spawn(String),
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::NotInitialized => {
                write!(f, "simulator is not initialized; call initialize() first")
            }
            ProxyError::WorkerGone => write!(f, "simulator worker is no longer running"),
            ProxyError::Initialization { cause } => {
                write!(f, "simulator initialization failed: {}", cause)
            }
            ProxyError::Rejected(reason) => write!(f, "request rejected: {}", reason),
            ProxyError::Spawn(reason) => write!(f, "failed to start simulator worker: {}", reason),
        }
    }
}

impl std::error::Error for ProxyError {}

enum WorkerCommand {
    Initialize {
        relay_audio: bool,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Run {
        source: String,
        reply: oneshot::Sender<String>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    GetStates {
        reply: oneshot::Sender<BoardState>,
    },
    SimulateInput {
        event: InputEvent,
        reply: oneshot::Sender<Result<(), String>>,
    },
    RegisterUltrasonic {
        sensor_id: String,
        trig_pin: PinId,
        echo_pin: PinId,
        reply: oneshot::Sender<()>,
    },
    UnregisterUltrasonic {
        sensor_id: String,
        reply: oneshot::Sender<bool>,
    },
    SetExternalPin {
        pin: PinId,
        value: i64,
        kind: PinKind,
        reply: oneshot::Sender<()>,
    },
    ClearExternalPin {
        pin: PinId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

enum HostMessage {
    Output(String),
    Event(BoardEvent),
    Audio {
        command: AudioCommand,
        done: oneshot::Sender<()>,
    },
    Trigger(UltrasonicTrigger),
}

/// Callbacks installed by the latest `initialize`. The pump reads them per
/// message, and a reload reinstalls them.
#[derive(Clone)]
struct Callbacks {
    on_output: OutputCallback,
    on_event: EventCallback,
    audio: Option<Arc<AudioRelay>>,
}

#[derive(Clone)]
struct SensorBinding {
    trig_pin: PinId,
    echo_pin: PinId,
    handler: TriggerHandler,
}

type SensorMap = Arc<Mutex<HashMap<String, SensorBinding>>>;
type SharedCallbacks = Arc<Mutex<Option<Callbacks>>>;

/// One worker thread and the channels to it.
struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    interrupt: InterruptHandle,
    /// Taken by the first `initialize` against this worker, which starts the pump.
    messages: Option<mpsc::UnboundedReceiver<HostMessage>>,
}

impl WorkerHandle {
    fn spawn(config: SimulatorConfig) -> Result<Self, ProxyError> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (host_tx, messages) = mpsc::unbounded_channel();
        let interrupt = InterruptHandle::new();
        let worker_interrupt = interrupt.clone();

        thread::Builder::new()
            .name("microbit-worker".to_string())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || worker_main(config, worker_interrupt, command_rx, host_tx))
            .map_err(|e| ProxyError::Spawn(e.to_string()))?;

        Ok(Self {
            commands,
            interrupt,
            messages: Some(messages),
        })
    }

    /// Stop the running program and end the worker's command loop.
    fn terminate(&self) {
        self.interrupt.interrupt();
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }
}

pub struct SimulatorProxy {
    config: SimulatorConfig,
    worker: Mutex<WorkerHandle>,
    initialized: AtomicBool,
    callbacks: SharedCallbacks,
    sensors: SensorMap,
}

impl SimulatorProxy {
    /// Start a worker. Returns without waiting for it to come up.
    pub fn new(config: SimulatorConfig) -> Result<Self, ProxyError> {
        let worker = WorkerHandle::spawn(config.clone())?;
        Ok(Self {
            config,
            worker: Mutex::new(worker),
            initialized: AtomicBool::new(false),
            callbacks: Arc::new(Mutex::new(None)),
            sensors: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Initialize the worker's simulator. The only call that reports the
    /// underlying cause of a failure.
    pub async fn initialize(
        &self,
        on_output: impl Fn(&str) + Send + Sync + 'static,
        on_event: impl Fn(&BoardEvent) + Send + Sync + 'static,
        audio: Option<Arc<AudioRelay>>,
    ) -> Result<(), ProxyError> {
        self.initialize_with(Callbacks {
            on_output: Arc::new(on_output),
            on_event: Arc::new(on_event),
            audio,
        })
        .await
    }

    async fn initialize_with(&self, callbacks: Callbacks) -> Result<(), ProxyError> {
        let relay_audio = callbacks.audio.is_some();
        *self.callbacks.lock() = Some(callbacks);

        let messages = self.worker.lock().messages.take();
        if let Some(messages) = messages {
            tokio::spawn(pump(messages, self.callbacks.clone(), self.sensors.clone()));
        }

        let result = self
            .send(|reply| WorkerCommand::Initialize { relay_audio, reply })
            .await?;
        result.map_err(|cause| ProxyError::Initialization { cause })?;
        self.initialized.store(true, Ordering::SeqCst);
        info!("simulator proxy initialized");
        Ok(())
    }

    pub async fn run(&self, source: &str) -> Result<String, ProxyError> {
        self.ensure_initialized()?;
        let source = source.to_string();
        self.send(|reply| WorkerCommand::Run { source, reply }).await
    }

    pub async fn reset(&self) -> Result<(), ProxyError> {
        self.ensure_initialized()?;
        self.send(|reply| WorkerCommand::Reset { reply }).await
    }

    pub async fn get_states(&self) -> Result<BoardState, ProxyError> {
        self.ensure_initialized()?;
        self.send(|reply| WorkerCommand::GetStates { reply }).await
    }

    pub async fn simulate_input(&self, event: InputEvent) -> Result<(), ProxyError> {
        self.ensure_initialized()?;
        self.send(|reply| WorkerCommand::SimulateInput { event, reply })
            .await?
            .map_err(ProxyError::Rejected)
    }

    /// Bind a sensor; `on_trigger` runs on the caller's runtime.
    pub async fn register_ultrasonic_sensor(
        &self,
        sensor_id: &str,
        trig_pin: PinId,
        echo_pin: PinId,
        on_trigger: impl Fn(&UltrasonicTrigger) + Send + Sync + 'static,
    ) -> Result<(), ProxyError> {
        self.ensure_initialized()?;
        let binding = SensorBinding {
            trig_pin,
            echo_pin,
            handler: Arc::new(on_trigger),
        };
        self.bind_sensor(sensor_id, binding).await
    }

    async fn bind_sensor(&self, sensor_id: &str, binding: SensorBinding) -> Result<(), ProxyError> {
        let trig_pin = binding.trig_pin.clone();
        let echo_pin = binding.echo_pin.clone();
        self.sensors.lock().insert(sensor_id.to_string(), binding);
        let sensor_id = sensor_id.to_string();
        self.send(|reply| WorkerCommand::RegisterUltrasonic {
            sensor_id,
            trig_pin,
            echo_pin,
            reply,
        })
        .await
    }

    pub async fn unregister_ultrasonic_sensor(&self, sensor_id: &str) -> Result<bool, ProxyError> {
        self.ensure_initialized()?;
        self.sensors.lock().remove(sensor_id);
        let sensor_id = sensor_id.to_string();
        self.send(|reply| WorkerCommand::UnregisterUltrasonic { sensor_id, reply })
            .await
    }

    pub async fn set_external_pin_value(
        &self,
        pin: PinId,
        value: i64,
        kind: PinKind,
    ) -> Result<(), ProxyError> {
        self.ensure_initialized()?;
        self.send(|reply| WorkerCommand::SetExternalPin {
            pin,
            value,
            kind,
            reply,
        })
        .await
    }

    pub async fn clear_external_pin_value(&self, pin: PinId) -> Result<bool, ProxyError> {
        self.ensure_initialized()?;
        self.send(|reply| WorkerCommand::ClearExternalPin { pin, reply })
            .await
    }

    /// Tear the worker down and start a fresh one.
    ///
    /// If the proxy was initialized before, the new worker is initialized
    /// with the same callbacks and sensor bindings.
    pub async fn dispose_and_reload(&self) -> Result<(), ProxyError> {
        let fresh = WorkerHandle::spawn(self.config.clone())?;
        let old = std::mem::replace(&mut *self.worker.lock(), fresh);
        old.terminate();
        self.initialized.store(false, Ordering::SeqCst);
        info!("simulator worker reloaded");

        let Some(callbacks) = self.callbacks.lock().clone() else {
            return Ok(());
        };
        self.initialize_with(callbacks).await?;

        let sensors: Vec<(String, SensorBinding)> = self
            .sensors
            .lock()
            .iter()
            .map(|(id, binding)| (id.clone(), binding.clone()))
            .collect();
        for (sensor_id, binding) in sensors {
            self.bind_sensor(&sensor_id, binding).await?;
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<(), ProxyError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ProxyError::NotInitialized)
        }
    }

    async fn send<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
    ) -> Result<T, ProxyError> {
        let (reply, response) = oneshot::channel();
        let commands = self.worker.lock().commands.clone();
        commands
            .send(command(reply))
            .map_err(|_| ProxyError::WorkerGone)?;
        response.await.map_err(|_| ProxyError::WorkerGone)
    }
}

impl Drop for SimulatorProxy {
    fn drop(&mut self) {
        self.worker.lock().terminate();
    }
}

/// Deliver worker traffic to the caller's callbacks.
async fn pump(
    mut messages: mpsc::UnboundedReceiver<HostMessage>,
    callbacks: SharedCallbacks,
    sensors: SensorMap,
) {
    while let Some(message) = messages.recv().await {
        let Some(callbacks) = callbacks.lock().clone() else {
            continue;
        };
        match message {
            HostMessage::Output(line) => (callbacks.on_output)(&line),
            HostMessage::Event(event) => (callbacks.on_event)(&event),
            HostMessage::Audio { command, done } => match &callbacks.audio {
                Some(relay) => {
                    let finished = relay.begin(command);
                    tokio::spawn(async move {
                        finished.await;
                        let _ = done.send(());
                    });
                }
                None => {
                    let _ = done.send(());
                }
            },
            HostMessage::Trigger(trigger) => {
                let handler = sensors
                    .lock()
                    .get(&trigger.sensor_id)
                    .map(|binding| binding.handler.clone());
                if let Some(handler) = handler {
                    handler(&trigger);
                }
            }
        }
    }
    debug!("worker message pump stopped");
}

fn worker_main(
    config: SimulatorConfig,
    interrupt: InterruptHandle,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    host: mpsc::UnboundedSender<HostMessage>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build worker runtime");
            return;
        }
    };

    // All board state is Rc-based; the LocalSet keeps every task on this thread.
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        let worker = Rc::new(Worker {
            sim: Simulator::with_interrupt(config, interrupt),
            host,
        });
        while let Some(command) = commands.recv().await {
            if matches!(command, WorkerCommand::Shutdown) {
                break;
            }
            // Each command gets its own task so a long `run` never blocks
            // `reset` or `get_states`.
            let worker = worker.clone();
            tokio::task::spawn_local(async move { worker.handle(command).await });
        }
        worker.sim.reset();
        debug!("worker shut down");
    });
}

struct Worker {
    sim: Simulator,
    host: mpsc::UnboundedSender<HostMessage>,
}

impl Worker {
    async fn handle(&self, command: WorkerCommand) {
        match command {
            WorkerCommand::Initialize { relay_audio, reply } => {
                let result = self.initialize(relay_audio).await;
                let _ = reply.send(result);
            }
            WorkerCommand::Run { source, reply } => {
                let diagnostic = self.sim.run(&source).await;
                let _ = reply.send(diagnostic);
            }
            WorkerCommand::Reset { reply } => {
                self.sim.reset();
                let _ = reply.send(());
            }
            WorkerCommand::GetStates { reply } => {
                let _ = reply.send(self.sim.get_states());
            }
            WorkerCommand::SimulateInput { event, reply } => {
                let result = self.sim.simulate_input(event).map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            WorkerCommand::RegisterUltrasonic {
                sensor_id,
                trig_pin,
                echo_pin,
                reply,
            } => {
                let host = self.host.clone();
                self.sim
                    .register_ultrasonic_sensor(&sensor_id, trig_pin, echo_pin, move |trigger| {
                        let _ = host.send(HostMessage::Trigger(trigger.clone()));
                    });
                let _ = reply.send(());
            }
            WorkerCommand::UnregisterUltrasonic { sensor_id, reply } => {
                let _ = reply.send(self.sim.unregister_ultrasonic_sensor(&sensor_id));
            }
            WorkerCommand::SetExternalPin {
                pin,
                value,
                kind,
                reply,
            } => {
                self.sim.set_external_pin_value(pin, value, kind);
                let _ = reply.send(());
            }
            WorkerCommand::ClearExternalPin { pin, reply } => {
                let _ = reply.send(self.sim.clear_external_pin_value(&pin));
            }
            WorkerCommand::Shutdown => {}
        }
    }

    async fn initialize(&self, relay_audio: bool) -> Result<(), String> {
        let output = self.host.clone();
        let events = self.host.clone();
        let sink = relay_audio.then(|| audio_sink(self.host.clone()));
        self.sim
            .initialize(
                move |line| {
                    let _ = output.send(HostMessage::Output(line.to_string()));
                },
                move |event| {
                    let _ = events.send(HostMessage::Event(event.clone()));
                },
                sink,
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "worker initialization failed");
                e.to_string()
            })
    }
}

/// An [`AudioSink`] that forwards commands to the host and resolves when the
/// host acknowledges them.
fn audio_sink(host: mpsc::UnboundedSender<HostMessage>) -> Rc<dyn AudioSink> {
    Rc::new(move |command: AudioCommand| -> LocalBoxFuture<'static, ()> {
        let (done, acknowledged) = oneshot::channel();
        if host.send(HostMessage::Audio { command, done }).is_err() {
            return future::ready(()).boxed_local();
        }
        async move {
            let _ = acknowledged.await;
        }
        .boxed_local()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_error_display() {
        assert_eq!(
            ProxyError::NotInitialized.to_string(),
            "simulator is not initialized; call initialize() first"
        );
        assert!(ProxyError::Initialization {
            cause: "runtime bundle unavailable".into()
        }
        .to_string()
        .ends_with("runtime bundle unavailable"));
    }

    #[tokio::test]
    async fn test_calls_before_initialize_fail_locally() {
        let proxy = SimulatorProxy::new(SimulatorConfig::default()).unwrap();
        assert!(!proxy.is_initialized());
        assert_eq!(proxy.run("x = 1").await, Err(ProxyError::NotInitialized));
        assert_eq!(proxy.get_states().await.err(), Some(ProxyError::NotInitialized));
        assert_eq!(proxy.reset().await, Err(ProxyError::NotInitialized));
    }
}
