use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use futures::future::{FutureExt, LocalBoxFuture};
use microbit_sandbox_types::{BoardEvent, BoardState};
use tokio::time::Instant;

use super::buttons::callable_arg;
use super::{reset_on_event, run_handlers, HardwareModule, Reporter, Surface};
use crate::event_hub::EventHub;
use crate::script::{expect_args, ScriptError, ScriptResult, Value};

/// Gestures the accelerometer can report.
pub const GESTURES: &[&str] = &[
    "shake",
    "logo_up",
    "logo_down",
    "screen_up",
    "screen_down",
    "tilt_left",
    "tilt_right",
    "free_fall",
    "3g",
    "6g",
    "8g",
];

/// Canonical gesture name: lowercase with `_` separators.
pub fn normalize_gesture(name: &str) -> Option<&'static str> {
    let canonical: String = name
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect();
    GESTURES.iter().copied().find(|g| *g == canonical)
}

fn gesture_arg(value: &Value) -> ScriptResult<&'static str> {
    let Value::Str(name) = value else {
        return Err(ScriptError::type_error(format!(
            "expected a gesture name, got '{}'",
            value.type_name()
        )));
    };
    normalize_gesture(name).ok_or_else(|| ScriptError::value_error(format!("unknown gesture '{}'", name)))
}

/// Accelerometer gestures. A trigger keeps its gesture active for the hold
/// window; triggering again inside the window restarts it.
pub struct Gesture {
    hub: Rc<EventHub>,
    reporter: Rc<Reporter>,
    hold: Duration,
    active_until: RefCell<BTreeMap<&'static str, Instant>>,
    handlers: RefCell<Vec<(&'static str, Value)>>,
}

impl Gesture {
    pub fn new(hub: Rc<EventHub>, reporter: Rc<Reporter>, hold: Duration) -> Rc<Self> {
        let gesture = Rc::new(Self {
            hub,
            reporter,
            hold,
            active_until: RefCell::new(BTreeMap::new()),
            handlers: RefCell::new(Vec::new()),
        });
        reset_on_event(&gesture.hub, &gesture);
        gesture
    }

    pub fn on_gesture(&self, name: &'static str, handler: Value) {
        self.handlers.borrow_mut().push((name, handler));
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active_until
            .borrow()
            .get(name)
            .is_some_and(|until| Instant::now() < *until)
    }

    pub fn active(&self) -> Vec<String> {
        let now = Instant::now();
        self.active_until
            .borrow()
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Fire gesture `name`; the returned future awaits every handler in order.
    pub fn trigger(&self, name: &str) -> Result<LocalBoxFuture<'static, ()>, String> {
        let name = normalize_gesture(name).ok_or_else(|| format!("unknown gesture '{}'", name))?;
        self.active_until
            .borrow_mut()
            .insert(name, Instant::now() + self.hold);
        self.hub.emit(BoardEvent::Gesture {
            name: name.to_string(),
        });
        let handlers: Vec<Value> = self
            .handlers
            .borrow()
            .iter()
            .filter(|(g, _)| *g == name)
            .map(|(_, h)| h.clone())
            .collect();
        Ok(run_handlers(handlers, format!("gesture {} handler", name), self.reporter.clone()).boxed_local())
    }
}

impl HardwareModule for Gesture {
    fn name(&self) -> &'static str {
        "gesture"
    }

    fn install(self: Rc<Self>, surface: &Surface) {
        let input = surface.namespace("input");

        let g = self.clone();
        input.define_sync("on_gesture", move |args| {
            expect_args("on_gesture", args, 2, 2)?;
            let name = gesture_arg(&args[0])?;
            g.on_gesture(name, callable_arg("on_gesture", &args[1])?);
            Ok(Value::None)
        });

        let g = self.clone();
        input.define_sync("is_gesture", move |args| {
            expect_args("is_gesture", args, 1, 1)?;
            Ok(Value::Bool(g.is_active(gesture_arg(&args[0])?)))
        });
    }

    fn write_state(&self, state: &mut BoardState) {
        state.gestures = self.active();
    }

    fn reset(&self) {
        self.active_until.borrow_mut().clear();
        self.handlers.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::NativeFunction;
    use std::cell::Cell;
    use tokio::time::sleep;

    #[test]
    fn test_normalize_gesture() {
        assert_eq!(normalize_gesture("Logo Up"), Some("logo_up"));
        assert_eq!(normalize_gesture("free-fall"), Some("free_fall"));
        assert_eq!(normalize_gesture("3G"), Some("3g"));
        assert_eq!(normalize_gesture("spin"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_window_restarts_on_retrigger() {
        let gesture = Gesture::new(EventHub::new(), Reporter::new(), Duration::from_millis(650));
        gesture.trigger("shake").unwrap().await;
        sleep(Duration::from_millis(500)).await;
        assert!(gesture.is_active("shake"));

        gesture.trigger("shake").unwrap().await;
        sleep(Duration::from_millis(500)).await;
        assert!(gesture.is_active("shake"), "second trigger restarted the window");
        sleep(Duration::from_millis(200)).await;
        assert!(!gesture.is_active("shake"));
        assert!(gesture.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handlers_are_awaited_in_order() {
        let gesture = Gesture::new(EventHub::new(), Reporter::new(), Duration::from_millis(650));
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["slow", "fast"] {
            let log = log.clone();
            let handler = NativeFunction::asynchronous(tag, move |_| {
                let log = log.clone();
                async move {
                    if tag == "slow" {
                        sleep(Duration::from_millis(100)).await;
                    }
                    log.borrow_mut().push(tag);
                    Ok(Value::None)
                }
                .boxed_local()
            });
            gesture.on_gesture("shake", handler);
        }
        let other = Rc::new(Cell::new(0));
        let o = other.clone();
        gesture.on_gesture(
            "tilt_left",
            NativeFunction::sync("tilt", move |_| {
                o.set(o.get() + 1);
                Ok(Value::None)
            }),
        );

        gesture.trigger("SHAKE").unwrap().await;
        assert_eq!(*log.borrow(), vec!["slow", "fast"]);
        assert_eq!(other.get(), 0);
        assert!(gesture.trigger("wobble").is_err());
    }
}
