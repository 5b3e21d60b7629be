use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use microbit_sandbox_types::{BoardEvent, BoardState};

use super::buttons::callable_arg;
use super::{reset_on_event, run_handlers, HardwareModule, Reporter, Surface};
use crate::event_hub::EventHub;
use crate::script::{expect_args, Value};

/// The capacitive touch logo: one zone with button semantics.
pub struct Logo {
    hub: Rc<EventHub>,
    reporter: Rc<Reporter>,
    pressed: Cell<bool>,
    on_pressed: RefCell<Vec<Value>>,
    on_released: RefCell<Vec<Value>>,
}

impl Logo {
    pub fn new(hub: Rc<EventHub>, reporter: Rc<Reporter>) -> Rc<Self> {
        let logo = Rc::new(Self {
            hub,
            reporter,
            pressed: Cell::new(false),
            on_pressed: RefCell::new(Vec::new()),
            on_released: RefCell::new(Vec::new()),
        });
        reset_on_event(&logo.hub, &logo);
        logo
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed.get()
    }

    /// Touch or release the logo; the returned future runs the matching handlers.
    pub fn touch(&self, pressed: bool) -> LocalBoxFuture<'static, ()> {
        self.pressed.set(pressed);
        self.hub.emit(BoardEvent::LogoTouch { pressed });
        let (handlers, context) = if pressed {
            (self.on_pressed.borrow().clone(), "logo pressed handler")
        } else {
            (self.on_released.borrow().clone(), "logo released handler")
        };
        run_handlers(handlers, context.to_string(), self.reporter.clone()).boxed_local()
    }
}

impl HardwareModule for Logo {
    fn name(&self) -> &'static str {
        "logo"
    }

    fn install(self: Rc<Self>, surface: &Surface) {
        let input = surface.namespace("input");

        let l = self.clone();
        input.define_sync("on_logo_pressed", move |args| {
            expect_args("on_logo_pressed", args, 1, 1)?;
            l.on_pressed
                .borrow_mut()
                .push(callable_arg("on_logo_pressed", &args[0])?);
            Ok(Value::None)
        });

        let l = self.clone();
        input.define_sync("on_logo_released", move |args| {
            expect_args("on_logo_released", args, 1, 1)?;
            l.on_released
                .borrow_mut()
                .push(callable_arg("on_logo_released", &args[0])?);
            Ok(Value::None)
        });

        let l = self.clone();
        input.define_sync("logo_is_pressed", move |args| {
            expect_args("logo_is_pressed", args, 0, 0)?;
            Ok(Value::Bool(l.is_pressed()))
        });
    }

    fn write_state(&self, state: &mut BoardState) {
        state.logo = self.pressed.get();
    }

    fn reset(&self) {
        self.pressed.set(false);
        self.on_pressed.borrow_mut().clear();
        self.on_released.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::NativeFunction;

    #[tokio::test]
    async fn test_press_and_release_handlers() {
        let hub = EventHub::new();
        let logo = Logo::new(hub.clone(), Reporter::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        for (list, tag) in [(&logo.on_pressed, "down"), (&logo.on_released, "up")] {
            let log = log.clone();
            list.borrow_mut().push(NativeFunction::sync(tag, move |_| {
                log.borrow_mut().push(tag);
                Ok(Value::None)
            }));
        }

        logo.touch(true).await;
        assert!(logo.is_pressed());
        logo.touch(false).await;
        assert!(!logo.is_pressed());
        assert_eq!(*log.borrow(), vec!["down", "up"]);

        hub.emit(BoardEvent::Reset {});
        logo.touch(true).await;
        assert_eq!(log.borrow().len(), 2);
    }
}
