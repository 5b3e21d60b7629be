//! Edge-connector pins.
//!
//! Reads prefer an external override set by an attached peripheral over the
//! last program-written value. Overrides and Rust-side write listeners
//! survive a reset; program-written values do not.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use microbit_sandbox_types::{
    BoardEvent, BoardState, ExternalPinValue, PinId, PinKind, PinState, ANALOG_MAX,
};
use tokio::time::Instant;
use tracing::trace;

use super::{pin_arg, reset_on_event, BoardClock, HardwareModule, Surface};
use crate::event_hub::EventHub;
use crate::script::{expect_args, Value};

/// Analog level at or above which an analog-only value reads as digital 1.
const DIGITAL_THRESHOLD: u16 = 512;

/// A program write, as seen by listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct PinWrite {
    pub pin: PinId,
    pub value: u16,
    pub kind: PinKind,
    /// Board time of the write.
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinListenerId(u64);

type PinListener = Rc<dyn Fn(&PinWrite)>;

pub struct Pins {
    hub: Rc<EventHub>,
    clock: Rc<BoardClock>,
    values: RefCell<BTreeMap<PinId, PinState>>,
    overrides: RefCell<BTreeMap<PinId, ExternalPinValue>>,
    listeners: RefCell<Vec<(PinListenerId, PinListener)>>,
    next_listener: Cell<u64>,
}

fn fresh_values() -> BTreeMap<PinId, PinState> {
    PinId::all().map(|p| (p, PinState::default())).collect()
}

impl Pins {
    pub fn new(hub: Rc<EventHub>, clock: Rc<BoardClock>) -> Rc<Self> {
        let pins = Rc::new(Self {
            hub,
            clock,
            values: RefCell::new(fresh_values()),
            overrides: RefCell::new(BTreeMap::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        });
        reset_on_event(&pins.hub, &pins);
        pins
    }

    pub fn digital_write(&self, pin: &PinId, value: i64) {
        let digital = u8::from(value != 0);
        self.values.borrow_mut().insert(
            pin.clone(),
            PinState {
                digital,
                analog: u16::from(digital) * ANALOG_MAX,
            },
        );
        self.publish(pin, u16::from(digital), PinKind::Digital);
    }

    pub fn analog_write(&self, pin: &PinId, value: i64) {
        let analog = value.clamp(0, i64::from(ANALOG_MAX)) as u16;
        self.values.borrow_mut().insert(
            pin.clone(),
            PinState {
                digital: u8::from(analog >= DIGITAL_THRESHOLD),
                analog,
            },
        );
        self.publish(pin, analog, PinKind::Analog);
    }

    fn publish(&self, pin: &PinId, value: u16, kind: PinKind) {
        self.hub.emit(BoardEvent::PinChange {
            pin: pin.clone(),
            value,
            kind,
        });
        let listeners: Vec<PinListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }
        let write = PinWrite {
            pin: pin.clone(),
            value,
            kind,
            at: self.clock.now(),
        };
        for listener in listeners {
            listener(&write);
        }
    }

    pub fn digital_read(&self, pin: &PinId) -> u8 {
        if let Some(forced) = self.overrides.borrow().get(pin) {
            return match forced.kind {
                PinKind::Digital => u8::from(forced.value != 0),
                PinKind::Analog => u8::from(forced.value >= DIGITAL_THRESHOLD),
            };
        }
        self.values.borrow().get(pin).map_or(0, |s| s.digital)
    }

    pub fn analog_read(&self, pin: &PinId) -> u16 {
        if let Some(forced) = self.overrides.borrow().get(pin) {
            return match forced.kind {
                PinKind::Digital => u16::from(forced.value != 0) * ANALOG_MAX,
                PinKind::Analog => forced.value,
            };
        }
        self.values.borrow().get(pin).map_or(0, |s| s.analog)
    }

    /// Force a value onto `pin`. The last writer wins.
    pub fn set_override(&self, pin: PinId, value: ExternalPinValue) {
        trace!(pin = %pin, value = value.value, kind = %value.kind, "external override");
        self.overrides.borrow_mut().insert(pin, value);
    }

    pub fn clear_override(&self, pin: &PinId) -> bool {
        self.overrides.borrow_mut().remove(pin).is_some()
    }

    pub fn add_listener(&self, listener: impl Fn(&PinWrite) + 'static) -> PinListenerId {
        let id = PinListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: PinListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }
}

impl HardwareModule for Pins {
    fn name(&self) -> &'static str {
        "pins"
    }

    fn install(self: Rc<Self>, surface: &Surface) {
        let ns = surface.namespace("pins");

        let p = self.clone();
        ns.define_sync("digital_write_pin", move |args| {
            expect_args("digital_write_pin", args, 2, 2)?;
            p.digital_write(&pin_arg(&args[0])?, args[1].to_int()?);
            Ok(Value::None)
        });

        let p = self.clone();
        ns.define_sync("digital_read_pin", move |args| {
            expect_args("digital_read_pin", args, 1, 1)?;
            Ok(Value::Int(i64::from(p.digital_read(&pin_arg(&args[0])?))))
        });

        let p = self.clone();
        ns.define_sync("analog_write_pin", move |args| {
            expect_args("analog_write_pin", args, 2, 2)?;
            p.analog_write(&pin_arg(&args[0])?, args[1].to_int()?);
            Ok(Value::None)
        });

        for name in ["read_analog_pin", "analog_read_pin"] {
            let p = self.clone();
            ns.define_sync(name, move |args| {
                expect_args(name, args, 1, 1)?;
                Ok(Value::Int(i64::from(p.analog_read(&pin_arg(&args[0])?))))
            });
        }
    }

    fn write_state(&self, state: &mut BoardState) {
        state.pins = self.values.borrow().clone();
        state.external_overrides = self.overrides.borrow().clone();
    }

    fn reset(&self) {
        *self.values.borrow_mut() = fresh_values();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(name: &str) -> PinId {
        name.parse().unwrap()
    }

    #[test]
    fn test_override_wins_until_cleared() {
        let hub = EventHub::new();
        let pins = Pins::new(hub.clone(), Rc::new(BoardClock::new()));
        pins.digital_write(&pin("P1"), 0);
        pins.set_override(pin("P1"), ExternalPinValue::new(1, PinKind::Digital));
        assert_eq!(pins.digital_read(&pin("P1")), 1);
        assert_eq!(pins.analog_read(&pin("P1")), ANALOG_MAX);

        hub.emit(BoardEvent::Reset {});
        assert_eq!(pins.digital_read(&pin("P1")), 1, "override survives reset");

        assert!(pins.clear_override(&pin("P1")));
        assert_eq!(pins.digital_read(&pin("P1")), 0);
        assert!(!pins.clear_override(&pin("P1")));
    }

    #[test]
    fn test_analog_override_reads_as_digital_threshold() {
        let pins = Pins::new(EventHub::new(), Rc::new(BoardClock::new()));
        pins.set_override(pin("P0"), ExternalPinValue::new(600, PinKind::Analog));
        assert_eq!(pins.digital_read(&pin("P0")), 1);
        pins.set_override(pin("P0"), ExternalPinValue::new(100, PinKind::Analog));
        assert_eq!(pins.digital_read(&pin("P0")), 0);
        assert_eq!(pins.analog_read(&pin("P0")), 100);
    }

    #[test]
    fn test_writes_reach_events_and_listeners() {
        let hub = EventHub::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        hub.subscribe_to("pin-change", move |e| seen.borrow_mut().push(e.clone()));
        let pins = Pins::new(hub.clone(), Rc::new(BoardClock::new()));

        let writes = Rc::new(RefCell::new(Vec::new()));
        let w = writes.clone();
        let id = pins.add_listener(move |write| w.borrow_mut().push((write.pin.clone(), write.value)));

        pins.analog_write(&pin("P2"), 5000);
        pins.digital_write(&pin("P2"), 7);
        assert_eq!(pins.analog_read(&pin("P2")), ANALOG_MAX);
        assert_eq!(*writes.borrow(), vec![(pin("P2"), ANALOG_MAX), (pin("P2"), 1)]);
        assert_eq!(
            events.borrow()[1],
            BoardEvent::PinChange {
                pin: pin("P2"),
                value: 1,
                kind: PinKind::Digital
            }
        );

        assert!(pins.remove_listener(id));
        pins.digital_write(&pin("P2"), 0);
        assert_eq!(writes.borrow().len(), 2);

        hub.emit(BoardEvent::Reset {});
        let mut state = BoardState::default();
        pins.write_state(&mut state);
        assert!(state.pins.values().all(|p| *p == PinState::default()));
    }
}
