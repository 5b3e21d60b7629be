use std::rc::Rc;
use std::time::Duration;

use microbit_sandbox_types::BoardState;

use super::{reset_on_event, BoardClock, HardwareModule, Surface};
use crate::event_hub::EventHub;
use crate::script::{expect_args, Value};

/// `control.wait_micros` and the run clock.
pub struct Control {
    clock: Rc<BoardClock>,
}

impl Control {
    pub fn new(clock: Rc<BoardClock>, hub: &EventHub) -> Rc<Self> {
        let control = Rc::new(Self { clock });
        reset_on_event(hub, &control);
        control
    }

    pub fn running_time_ms(&self) -> i64 {
        i64::try_from(self.clock.running_time().as_millis()).unwrap_or(i64::MAX)
    }
}

impl HardwareModule for Control {
    fn name(&self) -> &'static str {
        "control"
    }

    fn install(self: Rc<Self>, surface: &Surface) {
        let control = surface.namespace("control");

        let c = self.clone();
        control.define_sync("wait_micros", move |args| {
            expect_args("wait_micros", args, 1, 1)?;
            let micros = args[0].to_int()?.max(0) as u64;
            c.clock.busy_wait(Duration::from_micros(micros));
            Ok(Value::None)
        });

        let c = self.clone();
        control.define_sync("millis", move |args| {
            expect_args("millis", args, 0, 0)?;
            Ok(Value::Int(c.running_time_ms()))
        });

        let c = self.clone();
        surface
            .namespace("input")
            .define_sync("running_time", move |args| {
                expect_args("running_time", args, 0, 0)?;
                Ok(Value::Int(c.running_time_ms()))
            });
    }

    fn write_state(&self, _state: &mut BoardState) {}

    fn reset(&self) {
        self.clock.restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microbit_sandbox_types::BoardEvent;

    #[tokio::test(start_paused = true)]
    async fn test_running_time_restarts_on_reset() {
        let hub = EventHub::new();
        let control = Control::new(Rc::new(BoardClock::new()), &hub);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(control.running_time_ms(), 250);
        hub.emit(BoardEvent::Reset {});
        assert_eq!(control.running_time_ms(), 0);
    }
}
