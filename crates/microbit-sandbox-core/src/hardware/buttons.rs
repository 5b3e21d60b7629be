use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use microbit_sandbox_types::{BoardEvent, BoardState, ButtonId, ButtonStates};

use super::{button_arg, reset_on_event, run_handlers, HardwareModule, Reporter, Surface};
use crate::event_hub::EventHub;
use crate::script::{expect_args, ScriptError, ScriptResult, Value};

pub(crate) fn callable_arg(function: &str, value: &Value) -> ScriptResult<Value> {
    match value {
        Value::Function(_) | Value::Native(_) => Ok(value.clone()),
        other => Err(ScriptError::type_error(format!(
            "{}() expects a function, got '{}'",
            function,
            other.type_name()
        ))),
    }
}

/// Buttons A and B plus the A+B chord.
pub struct Buttons {
    hub: Rc<EventHub>,
    reporter: Rc<Reporter>,
    pressed: Cell<ButtonStates>,
    handlers: RefCell<Vec<(ButtonId, Value)>>,
}

impl Buttons {
    pub fn new(hub: Rc<EventHub>, reporter: Rc<Reporter>) -> Rc<Self> {
        let buttons = Rc::new(Self {
            hub,
            reporter,
            pressed: Cell::new(ButtonStates::default()),
            handlers: RefCell::new(Vec::new()),
        });
        reset_on_event(&buttons.hub, &buttons);
        buttons
    }

    pub fn on_pressed(&self, button: ButtonId, handler: Value) {
        self.handlers.borrow_mut().push((button, handler));
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self, button: ButtonId) -> usize {
        self.handlers
            .borrow()
            .iter()
            .filter(|(b, _)| *b == button)
            .count()
    }

    pub fn is_pressed(&self, button: ButtonId) -> bool {
        let state = self.pressed.get();
        match button {
            ButtonId::A => state.a,
            ButtonId::B => state.b,
            ButtonId::AB => state.ab,
        }
    }

    /// Press `button`. State changes and the event happen now; the returned
    /// future runs the registered handlers in order.
    pub fn press(&self, button: ButtonId) -> LocalBoxFuture<'static, ()> {
        let mut state = self.pressed.get();
        match button {
            ButtonId::A => state.a = true,
            ButtonId::B => state.b = true,
            ButtonId::AB => {
                state.a = true;
                state.b = true;
                state.ab = true;
            }
        }
        self.pressed.set(state);
        self.hub.emit(BoardEvent::ButtonPress { button });

        let handlers: Vec<Value> = self
            .handlers
            .borrow()
            .iter()
            .filter(|(b, _)| *b == button)
            .map(|(_, h)| h.clone())
            .collect();
        run_handlers(
            handlers,
            format!("button {} handler", button),
            self.reporter.clone(),
        )
        .boxed_local()
    }

    pub fn release(&self, button: ButtonId) {
        let mut state = self.pressed.get();
        match button {
            ButtonId::A => state.a = false,
            ButtonId::B => state.b = false,
            ButtonId::AB => state = ButtonStates::default(),
        }
        if button != ButtonId::AB {
            state.ab = false;
        }
        self.pressed.set(state);
        self.hub.emit(BoardEvent::ButtonRelease { button });
    }
}

impl HardwareModule for Buttons {
    fn name(&self) -> &'static str {
        "buttons"
    }

    fn install(self: Rc<Self>, surface: &Surface) {
        let input = surface.namespace("input");

        let b = self.clone();
        input.define_sync("on_button_pressed", move |args| {
            expect_args("on_button_pressed", args, 2, 2)?;
            let button = button_arg(&args[0])?;
            b.on_pressed(button, callable_arg("on_button_pressed", &args[1])?);
            Ok(Value::None)
        });

        let b = self.clone();
        input.define_sync("button_is_pressed", move |args| {
            expect_args("button_is_pressed", args, 1, 1)?;
            Ok(Value::Bool(b.is_pressed(button_arg(&args[0])?)))
        });
    }

    fn write_state(&self, state: &mut BoardState) {
        state.buttons = self.pressed.get();
    }

    fn reset(&self) {
        self.pressed.set(ButtonStates::default());
        self.handlers.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::NativeFunction;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, tag: &'static str, fail: bool) -> Value {
        let log = log.clone();
        NativeFunction::sync(tag, move |_| {
            log.borrow_mut().push(tag.to_string());
            if fail {
                Err(ScriptError::value_error("boom"))
            } else {
                Ok(Value::None)
            }
        })
    }

    #[tokio::test]
    async fn test_handlers_run_in_order_despite_failure() {
        let hub = EventHub::new();
        let reporter = Reporter::new();
        let output = Rc::new(RefCell::new(Vec::new()));
        let sink = output.clone();
        reporter.attach(Rc::new(move |line: &str| sink.borrow_mut().push(line.to_string())));
        let buttons = Buttons::new(hub, reporter);

        let log = Rc::new(RefCell::new(Vec::new()));
        buttons.on_pressed(ButtonId::A, recorder(&log, "first", false));
        buttons.on_pressed(ButtonId::A, recorder(&log, "second", true));
        buttons.on_pressed(ButtonId::A, recorder(&log, "third", false));
        buttons.on_pressed(ButtonId::B, recorder(&log, "other", false));

        buttons.press(ButtonId::A).await;
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
        assert_eq!(
            *output.borrow(),
            vec!["button A handler: ValueError: boom".to_string()]
        );
        assert!(buttons.is_pressed(ButtonId::A));
    }

    #[test]
    fn test_chord_and_release() {
        let hub = EventHub::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        hub.subscribe(move |e| seen.borrow_mut().push(e.kind()));
        let buttons = Buttons::new(hub.clone(), Reporter::new());

        drop(buttons.press(ButtonId::AB));
        assert!(buttons.is_pressed(ButtonId::A) && buttons.is_pressed(ButtonId::AB));
        buttons.release(ButtonId::A);
        assert!(!buttons.is_pressed(ButtonId::A));
        assert!(!buttons.is_pressed(ButtonId::AB));
        assert!(buttons.is_pressed(ButtonId::B));
        assert_eq!(*events.borrow(), vec!["button-press", "button-release"]);

        buttons.on_pressed(ButtonId::A, Value::None);
        hub.emit(BoardEvent::Reset {});
        assert!(!buttons.is_pressed(ButtonId::B));
        assert_eq!(buttons.handler_count(ButtonId::A), 0);
    }
}
