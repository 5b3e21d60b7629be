use std::cell::RefCell;
use std::rc::Rc;

use microbit_sandbox_types::{BoardEvent, BoardState, LedGrid, GRID_SIZE, MAX_BRIGHTNESS};

use super::{reset_on_event, HardwareModule, Surface};
use crate::event_hub::EventHub;
use crate::script::{expect_args, ScriptResult, Value};

/// The 5x5 LED matrix.
pub struct LedMatrix {
    hub: Rc<EventHub>,
    grid: RefCell<LedGrid>,
}

fn cell(x: i64, y: i64) -> Option<(usize, usize)> {
    let size = GRID_SIZE as i64;
    if (0..size).contains(&x) && (0..size).contains(&y) {
        Some((x as usize, y as usize))
    } else {
        None
    }
}

impl LedMatrix {
    pub fn new(hub: Rc<EventHub>) -> Rc<Self> {
        let matrix = Rc::new(Self {
            hub,
            grid: RefCell::new([[0; GRID_SIZE]; GRID_SIZE]),
        });
        reset_on_event(&matrix.hub, &matrix);
        matrix
    }

    /// Set one cell. Out-of-range coordinates are ignored; unchanged cells
    /// emit nothing.
    pub fn set(&self, x: i64, y: i64, value: u8) {
        let Some((x, y)) = cell(x, y) else {
            return;
        };
        let changed = {
            let mut grid = self.grid.borrow_mut();
            let slot = &mut grid[y][x];
            let changed = *slot != value;
            *slot = value;
            changed
        };
        if changed {
            self.hub.emit(BoardEvent::LedChange { x, y, value });
        }
    }

    pub fn get(&self, x: i64, y: i64) -> u8 {
        cell(x, y).map_or(0, |(x, y)| self.grid.borrow()[y][x])
    }

    pub fn toggle(&self, x: i64, y: i64) {
        let next = if self.get(x, y) > 0 { 0 } else { MAX_BRIGHTNESS };
        self.set(x, y, next);
    }

    /// Replace the whole grid, emitting one change per differing cell.
    pub fn show_frame(&self, frame: &LedGrid) {
        for (y, row) in frame.iter().enumerate() {
            for (x, &value) in row.iter().enumerate() {
                self.set(x as i64, y as i64, value);
            }
        }
    }

    pub fn clear_display(&self) {
        self.show_frame(&[[0; GRID_SIZE]; GRID_SIZE]);
    }

    pub fn grid(&self) -> LedGrid {
        *self.grid.borrow()
    }
}

fn coords(name: &str, args: &[Value], extra: usize) -> ScriptResult<(i64, i64)> {
    expect_args(name, args, 2, 2 + extra)?;
    Ok((args[0].to_int()?, args[1].to_int()?))
}

impl HardwareModule for LedMatrix {
    fn name(&self) -> &'static str {
        "led"
    }

    fn install(self: Rc<Self>, surface: &Surface) {
        let led = surface.namespace("led");

        let m = self.clone();
        led.define_sync("plot", move |args| {
            let (x, y) = coords("plot", args, 0)?;
            m.set(x, y, MAX_BRIGHTNESS);
            Ok(Value::None)
        });
        let m = self.clone();
        led.define_sync("unplot", move |args| {
            let (x, y) = coords("unplot", args, 0)?;
            m.set(x, y, 0);
            Ok(Value::None)
        });
        let m = self.clone();
        led.define_sync("toggle", move |args| {
            let (x, y) = coords("toggle", args, 0)?;
            m.toggle(x, y);
            Ok(Value::None)
        });
        let m = self.clone();
        led.define_sync("point", move |args| {
            let (x, y) = coords("point", args, 0)?;
            Ok(Value::Bool(m.get(x, y) > 0))
        });
        let m = self.clone();
        led.define_sync("plot_brightness", move |args| {
            let (x, y) = coords("plot_brightness", args, 1)?;
            let brightness = match args.get(2) {
                Some(b) => b.to_int()?.clamp(0, i64::from(MAX_BRIGHTNESS)) as u8,
                None => MAX_BRIGHTNESS,
            };
            m.set(x, y, brightness);
            Ok(Value::None)
        });
        let m = self.clone();
        led.define_sync("point_brightness", move |args| {
            let (x, y) = coords("point_brightness", args, 0)?;
            Ok(Value::Int(i64::from(m.get(x, y))))
        });
    }

    fn write_state(&self, state: &mut BoardState) {
        state.leds = self.grid();
    }

    fn reset(&self) {
        *self.grid.borrow_mut() = [[0; GRID_SIZE]; GRID_SIZE];
    }
}
