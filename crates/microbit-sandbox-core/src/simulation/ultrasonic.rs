//! Trigger-pulse detection for ultrasonic distance sensors.
//!
//! A sensor is bound to a trigger pin and an echo pin. Every digital write to
//! the trigger pin is inspected: a high write records its timestamp, and the
//! next low write measures the pulse. Pulses whose width falls inside the
//! configured window count as a trigger; anything else is noise.

use std::cell::RefCell;
use std::ops::RangeInclusive;
use std::rc::Rc;
use std::time::Duration;

use microbit_sandbox_types::{BoardEvent, PinId, PinKind};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::event_hub::EventHub;
use crate::hardware::PinWrite;

/// A detected trigger pulse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UltrasonicTrigger {
    pub sensor_id: String,
    pub trig_pin: PinId,
    pub echo_pin: PinId,
    /// Valid pulses seen by this binding so far, including this one.
    pub pulse_count: u64,
}

pub type TriggerCallback = Rc<dyn Fn(&UltrasonicTrigger)>;

struct Binding {
    sensor_id: String,
    trig_pin: PinId,
    echo_pin: PinId,
    last_high: Option<Instant>,
    pulse_count: u64,
    callback: TriggerCallback,
}

pub struct UltrasonicRegistry {
    window: RangeInclusive<Duration>,
    hub: Rc<EventHub>,
    bindings: RefCell<Vec<Binding>>,
}

impl UltrasonicRegistry {
    pub fn new(window: RangeInclusive<Duration>, hub: Rc<EventHub>) -> Rc<Self> {
        Rc::new(Self {
            window,
            hub,
            bindings: RefCell::new(Vec::new()),
        })
    }

    /// Bind a sensor. Registering an existing id replaces its binding.
    pub fn register(&self, sensor_id: &str, trig_pin: PinId, echo_pin: PinId, callback: TriggerCallback) {
        let mut bindings = self.bindings.borrow_mut();
        bindings.retain(|b| b.sensor_id != sensor_id);
        debug!(sensor = sensor_id, trig = %trig_pin, echo = %echo_pin, "ultrasonic sensor bound");
        bindings.push(Binding {
            sensor_id: sensor_id.to_string(),
            trig_pin,
            echo_pin,
            last_high: None,
            pulse_count: 0,
            callback,
        });
    }

    pub fn unregister(&self, sensor_id: &str) -> bool {
        let mut bindings = self.bindings.borrow_mut();
        let before = bindings.len();
        bindings.retain(|b| b.sensor_id != sensor_id);
        bindings.len() != before
    }

    pub fn pulse_count(&self, sensor_id: &str) -> Option<u64> {
        self.bindings
            .borrow()
            .iter()
            .find(|b| b.sensor_id == sensor_id)
            .map(|b| b.pulse_count)
    }

    #[cfg(test)]
    pub(crate) fn sensor_ids(&self) -> Vec<String> {
        self.bindings
            .borrow()
            .iter()
            .map(|b| b.sensor_id.clone())
            .collect()
    }

    pub fn on_pin_write(&self, write: &PinWrite) {
        if write.kind != PinKind::Digital {
            return;
        }
        let mut fired = Vec::new();
        {
            let mut bindings = self.bindings.borrow_mut();
            for binding in bindings.iter_mut().filter(|b| b.trig_pin == write.pin) {
                if write.value != 0 {
                    binding.last_high = Some(write.at);
                    continue;
                }
                let Some(high) = binding.last_high.take() else {
                    continue;
                };
                let width = write.at.saturating_duration_since(high);
                if !self.window.contains(&width) {
                    trace!(sensor = %binding.sensor_id, width_us = width.as_micros() as u64, "pulse rejected");
                    continue;
                }
                binding.pulse_count += 1;
                fired.push((
                    binding.callback.clone(),
                    UltrasonicTrigger {
                        sensor_id: binding.sensor_id.clone(),
                        trig_pin: binding.trig_pin.clone(),
                        echo_pin: binding.echo_pin.clone(),
                        pulse_count: binding.pulse_count,
                    },
                ));
            }
        }

        for (callback, trigger) in fired {
            self.hub.emit(BoardEvent::UltrasonicTrigger {
                sensor_id: trigger.sensor_id.clone(),
                trig_pin: trigger.trig_pin.clone(),
                echo_pin: trigger.echo_pin.clone(),
            });
            callback(&trigger);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn pin(name: &str) -> PinId {
        name.parse().unwrap()
    }

    fn write(value: u16, at: Instant) -> PinWrite {
        PinWrite {
            pin: pin("P1"),
            value,
            kind: PinKind::Digital,
            at,
        }
    }

    fn registry() -> (Rc<UltrasonicRegistry>, Rc<Cell<u32>>) {
        let registry = UltrasonicRegistry::new(
            Duration::from_micros(2)..=Duration::from_micros(100),
            EventHub::new(),
        );
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        registry.register(
            "sonar",
            pin("P1"),
            pin("P2"),
            Rc::new(move |t: &UltrasonicTrigger| {
                assert_eq!(t.echo_pin.as_str(), "P2");
                f.set(f.get() + 1);
            }),
        );
        (registry, fired)
    }

    #[test]
    fn test_pulse_window() {
        let (registry, fired) = registry();
        let t0 = Instant::now();
        registry.on_pin_write(&write(1, t0));
        registry.on_pin_write(&write(0, t0 + Duration::from_micros(10)));
        assert_eq!(fired.get(), 1);

        registry.on_pin_write(&write(1, t0 + Duration::from_millis(1)));
        registry.on_pin_write(&write(0, t0 + Duration::from_millis(1) + Duration::from_micros(200)));
        assert_eq!(fired.get(), 1, "200us pulse is noise");
        assert_eq!(registry.pulse_count("sonar"), Some(1));
    }

    #[test]
    fn test_low_without_high_and_other_pins_are_ignored() {
        let (registry, fired) = registry();
        let t0 = Instant::now();
        registry.on_pin_write(&write(0, t0));
        registry.on_pin_write(&PinWrite {
            pin: pin("P3"),
            value: 1,
            kind: PinKind::Digital,
            at: t0,
        });
        registry.on_pin_write(&PinWrite {
            pin: pin("P1"),
            value: 1023,
            kind: PinKind::Analog,
            at: t0,
        });
        assert_eq!(fired.get(), 0);
        assert!(registry.unregister("sonar"));
        assert!(registry.sensor_ids().is_empty());
    }
}
