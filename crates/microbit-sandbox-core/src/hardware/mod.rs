//! Simulated board peripherals.
//!
//! Each peripheral is a [`HardwareModule`]: it owns its slice of board state,
//! installs functions into the script-visible API [`Surface`], contributes to
//! the [`BoardState`] snapshot, and returns to power-on state on reset.
//!
//! Modules learn about resets through the event hub: each one subscribes to
//! `reset` events when it is constructed, before any host subscriber, so the
//! board is already clean when the host observes the reset.
//!
//! # Modules
//!
//! | Module | Namespace | State |
//! |--------|-----------|-------|
//! | [`LedMatrix`] | `led` | 5x5 brightness grid |
//! | [`Display`] | `basic` | animation sessions, forever loop |
//! | [`Buttons`] | `input` | A/B/AB pressed flags, press handlers |
//! | [`Logo`] | `input` | touch flag, press/release handlers |
//! | [`Gesture`] | `input` | active gestures with decay |
//! | [`Pins`] | `pins` | pin values, external overrides |
//! | [`Music`] | `music` | audio relay |
//! | [`Environment`] | `input` | light level, temperature |
//! | [`Control`] | `control` | board clock |

mod buttons;
mod clock;
mod control;
mod display;
mod environment;
mod font;
mod gesture;
mod leds;
mod logo;
mod music;
mod pins;
mod surface;

use std::cell::RefCell;
use std::rc::Rc;

use microbit_sandbox_types::{BoardState, ButtonId, PinId};
use tracing::warn;

use crate::event_hub::EventHub;
use crate::script::{invoke_callback, OutputSink, ScriptError, ScriptResult, Value};

pub use buttons::Buttons;
pub use clock::BoardClock;
pub use control::Control;
pub use display::{Display, DisplayPhase};
pub use environment::Environment;
pub use gesture::{Gesture, GESTURES};
pub use leds::LedMatrix;
pub use logo::Logo;
pub use music::{AudioSink, Music};
pub use pins::{PinListenerId, PinWrite, Pins};
pub use surface::Surface;

/// A peripheral of the simulated board.
pub trait HardwareModule {
    fn name(&self) -> &'static str;

    /// Register this module's functions on the script-visible surface.
    fn install(self: Rc<Self>, surface: &Surface);

    /// Copy this module's state into a snapshot.
    fn write_state(&self, state: &mut BoardState);

    /// Return to power-on state.
    fn reset(&self);
}

/// Call `module.reset()` whenever a `reset` event is emitted.
pub(crate) fn reset_on_event<M: HardwareModule + 'static>(hub: &EventHub, module: &Rc<M>) {
    let weak = Rc::downgrade(module);
    hub.subscribe_to("reset", move |_| {
        if let Some(module) = weak.upgrade() {
            module.reset();
        }
    });
}

/// Where handler failures go: the log, and the program's output when attached.
#[derive(Default)]
pub struct Reporter {
    sink: RefCell<Option<OutputSink>>,
}

impl Reporter {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn attach(&self, sink: OutputSink) {
        *self.sink.borrow_mut() = Some(sink);
    }

    pub fn report(&self, context: &str, error: &ScriptError) {
        warn!(context, error = %error, "program handler failed");
        self.emit(&format!("{}: {}", context, error));
    }

    pub fn notice(&self, message: &str) {
        warn!("{}", message);
        self.emit(message);
    }

    fn emit(&self, line: &str) {
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink(line);
        }
    }
}

/// Run program handlers one after another. A failing handler is reported and
/// does not stop the rest.
pub(crate) async fn run_handlers(handlers: Vec<Value>, context: String, reporter: Rc<Reporter>) {
    for handler in handlers {
        if let Err(e) = invoke_callback(handler, Vec::new()).await {
            reporter.report(&context, &e);
        }
    }
}

// =============================================================================
// Argument helpers
// =============================================================================

pub(crate) fn pin_arg(value: &Value) -> ScriptResult<PinId> {
    match value {
        Value::Str(name) => name.parse().map_err(ScriptError::value_error),
        Value::Int(_) | Value::Bool(_) => {
            PinId::from_number(value.to_index()?).map_err(ScriptError::value_error)
        }
        other => Err(ScriptError::type_error(format!(
            "expected a pin, got '{}'",
            other.type_name()
        ))),
    }
}

pub(crate) fn button_arg(value: &Value) -> ScriptResult<ButtonId> {
    match value {
        Value::Str(name) => name.parse().map_err(ScriptError::value_error),
        other => Err(ScriptError::type_error(format!(
            "expected a button, got '{}'",
            other.type_name()
        ))),
    }
}

/// Milliseconds argument; negative values mean zero, oversized ones saturate.
pub(crate) fn millis_arg(value: &Value) -> ScriptResult<std::time::Duration> {
    let ms = value.to_float()?;
    if ms.is_nan() || ms <= 0.0 {
        return Ok(std::time::Duration::ZERO);
    }
    Ok(std::time::Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(std::time::Duration::MAX))
}

/// Every peripheral of one board, wired to a shared hub.
pub struct Board {
    pub hub: Rc<EventHub>,
    pub reporter: Rc<Reporter>,
    pub clock: Rc<BoardClock>,
    pub leds: Rc<LedMatrix>,
    pub display: Rc<Display>,
    pub buttons: Rc<Buttons>,
    pub logo: Rc<Logo>,
    pub gesture: Rc<Gesture>,
    pub pins: Rc<Pins>,
    pub music: Rc<Music>,
    pub environment: Rc<Environment>,
    pub control: Rc<Control>,
}

impl Board {
    pub fn new(
        config: &crate::config::SimulatorConfig,
        tasks: Rc<crate::tasks::TaskScope>,
    ) -> Self {
        let hub = EventHub::new();
        let reporter = Reporter::new();
        let clock = Rc::new(BoardClock::new());
        let leds = LedMatrix::new(hub.clone());
        let display = Display::new(
            leds.clone(),
            config.timing.clone(),
            tasks,
            reporter.clone(),
            &hub,
        );
        Self {
            buttons: Buttons::new(hub.clone(), reporter.clone()),
            logo: Logo::new(hub.clone(), reporter.clone()),
            gesture: Gesture::new(hub.clone(), reporter.clone(), config.timing.gesture_hold()),
            pins: Pins::new(hub.clone(), clock.clone()),
            music: Music::new(config.timing.ms_per_beat, &hub),
            environment: Environment::new(&config.environment),
            control: Control::new(clock.clone(), &hub),
            hub,
            reporter,
            clock,
            leds,
            display,
        }
    }

    pub fn modules(&self) -> Vec<Rc<dyn HardwareModule>> {
        let modules: [Rc<dyn HardwareModule>; 9] = [
            self.leds.clone(),
            self.display.clone(),
            self.buttons.clone(),
            self.logo.clone(),
            self.gesture.clone(),
            self.pins.clone(),
            self.music.clone(),
            self.environment.clone(),
            self.control.clone(),
        ];
        modules.into()
    }

    /// Build the importable `microbit` module from every peripheral.
    pub fn surface_module(&self, name: &str) -> Rc<crate::script::ModuleObject> {
        let surface = Surface::new();
        for module in self.modules() {
            module.install(&surface);
        }
        surface.into_module(name)
    }

    pub fn snapshot(&self) -> BoardState {
        let mut state = BoardState::default();
        for module in self.modules() {
            module.write_state(&mut state);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_arguments() {
        assert_eq!(pin_arg(&Value::str("P3")).unwrap().as_str(), "P3");
        assert_eq!(pin_arg(&Value::Int(12)).unwrap().as_str(), "P12");
        assert!(pin_arg(&Value::Int(17)).is_err());
        assert!(pin_arg(&Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_millis_argument_clamps_range() {
        assert_eq!(millis_arg(&Value::Int(-5)).unwrap(), std::time::Duration::ZERO);
        assert_eq!(
            millis_arg(&Value::Int(250)).unwrap(),
            std::time::Duration::from_millis(250)
        );
        assert_eq!(
            millis_arg(&Value::Float(1e30)).unwrap(),
            std::time::Duration::MAX
        );
    }
}
