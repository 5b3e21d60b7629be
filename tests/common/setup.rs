//! High-level test setup helpers.

use std::sync::Arc;

use microbit_sandbox::{AudioRelay, RecordingOutput, SimulatorProxy, DEFAULT_MS_PER_BEAT};
use microbit_sandbox_core::SimulatorConfig;
use microbit_sandbox_types::BoardEvent;
use parking_lot::Mutex;

/// Everything the worker sent back to the host.
#[derive(Clone, Default)]
pub struct Recorded {
    pub output: Arc<Mutex<Vec<String>>>,
    pub events: Arc<Mutex<Vec<BoardEvent>>>,
    pub tones: RecordingOutput,
}

impl Recorded {
    pub fn lines(&self) -> Vec<String> {
        self.output.lock().clone()
    }

    pub fn has_line(&self, line: &str) -> bool {
        self.output.lock().iter().any(|l| l == line)
    }

    pub fn event_count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }
}

/// A proxy with default config, initialized with recording callbacks and an
/// audio relay.
pub async fn initialized_proxy() -> (Arc<SimulatorProxy>, Recorded) {
    let proxy = Arc::new(SimulatorProxy::new(SimulatorConfig::default()).expect("spawn worker"));
    let recorded = Recorded::default();
    let relay = AudioRelay::new(recorded.tones.clone(), DEFAULT_MS_PER_BEAT);

    let output = recorded.output.clone();
    let events = recorded.events.clone();
    proxy
        .initialize(
            move |line| output.lock().push(line.to_string()),
            move |event| events.lock().push(event.clone()),
            Some(relay),
        )
        .await
        .expect("initialize");
    (proxy, recorded)
}
