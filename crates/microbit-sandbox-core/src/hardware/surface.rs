//! The script-visible API surface assembled from hardware modules.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use microbit_sandbox_types::BOARD_PINS;

use super::gesture::GESTURES;
use crate::script::{ModuleObject, Value};

/// Namespaces (`basic`, `led`, ...) being filled in by modules.
#[derive(Default)]
pub struct Surface {
    namespaces: RefCell<BTreeMap<String, Rc<ModuleObject>>>,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a namespace. Several modules may share one.
    pub fn namespace(&self, name: &str) -> Rc<ModuleObject> {
        self.namespaces
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| ModuleObject::new(name))
            .clone()
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.borrow().keys().cloned().collect()
    }

    /// Wrap all namespaces plus the enum-like constant groups into one module.
    pub fn into_module(self, name: &str) -> Rc<ModuleObject> {
        let root = ModuleObject::new(name);
        for (ns_name, ns) in self.namespaces.into_inner() {
            root.set(ns_name, Value::Module(ns));
        }

        let buttons = ModuleObject::new("Button");
        buttons.define_constants(&[("A", "A"), ("B", "B"), ("AB", "AB")]);
        root.set("Button", Value::Module(buttons));

        let gestures = ModuleObject::new("Gesture");
        for gesture in GESTURES {
            let constant = match *gesture {
                "3g" => "THREE_G".to_string(),
                "6g" => "SIX_G".to_string(),
                "8g" => "EIGHT_G".to_string(),
                other => other.to_ascii_uppercase(),
            };
            gestures.set(constant, Value::str(gesture));
        }
        root.set("Gesture", Value::Module(gestures));

        for group in ["DigitalPin", "AnalogPin"] {
            let pins = ModuleObject::new(group);
            for pin in BOARD_PINS {
                pins.set(*pin, Value::str(pin));
            }
            root.set(group, Value::Module(pins));
        }
        root
    }
}
