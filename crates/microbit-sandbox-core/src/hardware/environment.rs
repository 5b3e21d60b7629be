use std::cell::Cell;
use std::rc::Rc;

use microbit_sandbox_types::BoardState;

use super::{HardwareModule, Surface};
use crate::config::EnvironmentConfig;
use crate::script::{expect_args, Value};

/// Ambient light and temperature. Readings come from the host and are not
/// touched by a program reset.
pub struct Environment {
    light_level: Cell<u8>,
    temperature: Cell<i32>,
}

impl Environment {
    pub fn new(config: &EnvironmentConfig) -> Rc<Self> {
        Rc::new(Self {
            light_level: Cell::new(config.light_level),
            temperature: Cell::new(config.temperature),
        })
    }

    pub fn light_level(&self) -> u8 {
        self.light_level.get()
    }

    pub fn set_light_level(&self, level: u8) {
        self.light_level.set(level);
    }

    pub fn temperature(&self) -> i32 {
        self.temperature.get()
    }

    pub fn set_temperature(&self, celsius: i32) {
        self.temperature.set(celsius);
    }
}

impl HardwareModule for Environment {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn install(self: Rc<Self>, surface: &Surface) {
        let input = surface.namespace("input");

        let env = self.clone();
        input.define_sync("light_level", move |args| {
            expect_args("light_level", args, 0, 0)?;
            Ok(Value::Int(i64::from(env.light_level())))
        });

        let env = self.clone();
        input.define_sync("temperature", move |args| {
            expect_args("temperature", args, 0, 0)?;
            Ok(Value::Int(i64::from(env.temperature())))
        });
    }

    fn write_state(&self, state: &mut BoardState) {
        state.light_level = self.light_level();
        state.temperature = self.temperature();
    }

    fn reset(&self) {}
}
