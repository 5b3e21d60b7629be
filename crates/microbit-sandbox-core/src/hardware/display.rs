//! The `basic` namespace: text and pattern animations, `forever`, `pause`.
//!
//! Every `show_*` call opens an animation session with a fresh token. The
//! token is taken when the call is made, not when its future first runs, so
//! a later call always supersedes an earlier one even if neither has been
//! awaited yet. Frame loops check their token before drawing and simply stop
//! once it is stale; nothing is cancelled explicitly.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use futures::future::{self, FutureExt, LocalBoxFuture};
use microbit_sandbox_types::{BoardState, LedGrid, GRID_SIZE, MAX_BRIGHTNESS};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;

use super::font;
use super::{millis_arg, reset_on_event, HardwareModule, LedMatrix, Reporter, Surface};
use crate::config::TimingConfig;
use crate::event_hub::EventHub;
use crate::script::{expect_args, invoke_callback, ScriptError, ScriptResult, Value};
use crate::tasks::TaskScope;

const BLANK: LedGrid = [[0; GRID_SIZE]; GRID_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayPhase {
    Idle,
    Animating(u64),
}

pub struct Display {
    leds: Rc<LedMatrix>,
    timing: TimingConfig,
    tasks: Rc<TaskScope>,
    reporter: Rc<Reporter>,
    token: Cell<u64>,
    phase: watch::Sender<DisplayPhase>,
    /// Generation of the active forever registration, if any.
    forever: Cell<Option<u64>>,
    forever_generation: Cell<u64>,
}

/// One animation. Dropping it returns the display to idle if no newer
/// session has started.
struct Session {
    display: Rc<Display>,
    token: u64,
}

impl Session {
    fn is_current(&self) -> bool {
        self.display.token.get() == self.token
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.is_current() {
            self.display.phase.send_replace(DisplayPhase::Idle);
        }
    }
}

impl Display {
    pub fn new(
        leds: Rc<LedMatrix>,
        timing: TimingConfig,
        tasks: Rc<TaskScope>,
        reporter: Rc<Reporter>,
        hub: &EventHub,
    ) -> Rc<Self> {
        let (phase, _) = watch::channel(DisplayPhase::Idle);
        let display = Rc::new(Self {
            leds,
            timing,
            tasks,
            reporter,
            token: Cell::new(0),
            phase,
            forever: Cell::new(None),
            forever_generation: Cell::new(0),
        });
        reset_on_event(hub, &display);
        display
    }

    fn begin(self: &Rc<Self>) -> Session {
        let token = self.token.get() + 1;
        self.token.set(token);
        self.phase.send_replace(DisplayPhase::Animating(token));
        Session {
            display: self.clone(),
            token,
        }
    }

    pub fn phase(&self) -> DisplayPhase {
        *self.phase.borrow()
    }

    /// Resolve once no animation is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|phase| *phase == DisplayPhase::Idle).await;
    }

    /// Show `text`: statically for one character, scrolling otherwise.
    pub fn show_text(self: &Rc<Self>, text: String, interval: Duration) -> LocalBoxFuture<'static, ()> {
        let session = self.begin();
        async move {
            let display = session.display.clone();
            let chars: Vec<char> = text.chars().collect();
            if chars.len() <= 1 {
                if !session.is_current() {
                    return;
                }
                let frame = chars.first().map_or(BLANK, |c| font::char_frame(*c));
                display.leds.show_frame(&frame);
                sleep(display.timing.settle()).await;
                return;
            }

            let columns = font::scroll_columns(&text);
            for offset in 1..=columns.len() - GRID_SIZE {
                if !session.is_current() {
                    debug!(token = session.token, "scroll superseded");
                    return;
                }
                display.leds.show_frame(&font::window(&columns, offset));
                sleep(interval).await;
            }
            if session.is_current() {
                display.leds.clear_display();
            }
        }
        .boxed_local()
    }

    pub fn show_frame(self: &Rc<Self>, frame: LedGrid, hold: Duration) -> LocalBoxFuture<'static, ()> {
        let session = self.begin();
        async move {
            if !session.is_current() {
                return;
            }
            session.display.leds.show_frame(&frame);
            sleep(hold).await;
        }
        .boxed_local()
    }

    pub fn clear_screen(self: &Rc<Self>) {
        let session = self.begin();
        self.leds.clear_display();
        drop(session);
    }

    /// Register the forever loop. Returns `false` if one is already active.
    pub fn forever(self: &Rc<Self>, callback: Value) -> bool {
        if self.forever.get().is_some() {
            self.reporter
                .notice("Warning: basic.forever() is already registered; ignoring this one");
            return false;
        }
        let generation = self.forever_generation.get() + 1;
        self.forever_generation.set(generation);
        self.forever.set(Some(generation));

        let display = self.clone();
        let tick = self.timing.forever_tick();
        self.tasks.spawn(async move {
            while display.forever.get() == Some(generation) {
                if let Err(e) = invoke_callback(callback.clone(), Vec::new()).await {
                    display.reporter.report("basic.forever", &e);
                    if display.forever.get() == Some(generation) {
                        display.forever.set(None);
                    }
                    break;
                }
                display.wait_idle().await;
                sleep(tick).await;
            }
            debug!(generation, "forever loop ended");
        });
        true
    }

    pub fn forever_registered(&self) -> bool {
        self.forever.get().is_some()
    }
}

/// Parse a `show_leds` picture: 25 cells of `#`/`*`/`1` (lit) or `.`/`0`
/// (dark), whitespace ignored.
pub(crate) fn parse_pattern(pattern: &str) -> ScriptResult<LedGrid> {
    let mut cells = Vec::with_capacity(GRID_SIZE * GRID_SIZE);
    for ch in pattern.chars().filter(|c| !c.is_whitespace()) {
        let lit = match ch {
            '#' | '*' | '1' => true,
            '.' | '0' => false,
            other => {
                return Err(ScriptError::value_error(format!(
                    "invalid LED pattern character '{}'",
                    other
                )))
            }
        };
        cells.push(lit);
    }
    if cells.len() != GRID_SIZE * GRID_SIZE {
        return Err(ScriptError::value_error(format!(
            "LED pattern needs {} cells, got {}",
            GRID_SIZE * GRID_SIZE,
            cells.len()
        )));
    }
    let mut frame = BLANK;
    for (i, lit) in cells.into_iter().enumerate() {
        if lit {
            frame[i / GRID_SIZE][i % GRID_SIZE] = MAX_BRIGHTNESS;
        }
    }
    Ok(frame)
}

fn interval_arg(args: &[Value], default_ms: u64) -> ScriptResult<Duration> {
    match args.get(1) {
        Some(value) => millis_arg(value),
        None => Ok(Duration::from_millis(default_ms)),
    }
}

fn show_string_call(d: &Rc<Display>, args: &[Value]) -> ScriptResult<LocalBoxFuture<'static, ()>> {
    expect_args("show_string", args, 1, 2)?;
    let interval = interval_arg(args, d.timing.scroll_interval_ms)?;
    Ok(d.show_text(args[0].to_display(), interval))
}

fn show_number_call(d: &Rc<Display>, args: &[Value]) -> ScriptResult<LocalBoxFuture<'static, ()>> {
    expect_args("show_number", args, 1, 2)?;
    if !args[0].is_number() {
        return Err(ScriptError::type_error(format!(
            "show_number() expects a number, got '{}'",
            args[0].type_name()
        )));
    }
    let interval = interval_arg(args, d.timing.scroll_interval_ms)?;
    Ok(d.show_text(args[0].to_display(), interval))
}

fn show_leds_call(d: &Rc<Display>, args: &[Value]) -> ScriptResult<LocalBoxFuture<'static, ()>> {
    expect_args("show_leds", args, 1, 2)?;
    let Value::Str(pattern) = &args[0] else {
        return Err(ScriptError::type_error("show_leds() expects a string pattern"));
    };
    let frame = parse_pattern(pattern)?;
    let hold = interval_arg(args, d.timing.settle_ms)?;
    Ok(d.show_frame(frame, hold))
}

fn animate(result: ScriptResult<LocalBoxFuture<'static, ()>>) -> LocalBoxFuture<'static, ScriptResult<Value>> {
    match result {
        Ok(animation) => async move {
            animation.await;
            Ok(Value::None)
        }
        .boxed_local(),
        Err(e) => future::ready(Err(e)).boxed_local(),
    }
}

impl HardwareModule for Display {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn install(self: Rc<Self>, surface: &Surface) {
        let basic = surface.namespace("basic");

        let d = self.clone();
        basic.define_async("show_string", move |args| animate(show_string_call(&d, &args)));
        let d = self.clone();
        basic.define_async("show_number", move |args| animate(show_number_call(&d, &args)));
        let d = self.clone();
        basic.define_async("show_leds", move |args| animate(show_leds_call(&d, &args)));

        let d = self.clone();
        basic.define_sync("clear_screen", move |args| {
            expect_args("clear_screen", args, 0, 0)?;
            d.clear_screen();
            Ok(Value::None)
        });

        let d = self.clone();
        basic.define_sync("forever", move |args| {
            expect_args("forever", args, 1, 1)?;
            d.forever(args[0].clone());
            Ok(Value::None)
        });

        basic.define_async("pause", |args| {
            let duration = expect_args("pause", &args, 1, 1).and_then(|_| millis_arg(&args[0]));
            async move {
                sleep(duration?).await;
                Ok(Value::None)
            }
            .boxed_local()
        });
    }

    fn write_state(&self, _state: &mut BoardState) {}

    fn reset(&self) {
        self.token.set(self.token.get() + 1);
        self.phase.send_replace(DisplayPhase::Idle);
        self.forever.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::NativeFunction;
    use std::cell::RefCell;
    use microbit_sandbox_types::BoardEvent;

    struct Rig {
        hub: Rc<EventHub>,
        leds: Rc<LedMatrix>,
        display: Rc<Display>,
        notices: Rc<RefCell<Vec<String>>>,
    }

    fn rig() -> Rig {
        let hub = EventHub::new();
        let leds = LedMatrix::new(hub.clone());
        let reporter = Reporter::new();
        let notices = Rc::new(RefCell::new(Vec::new()));
        let sink = notices.clone();
        reporter.attach(Rc::new(move |line: &str| sink.borrow_mut().push(line.to_string())));
        let display = Display::new(
            leds.clone(),
            TimingConfig::default(),
            Rc::new(TaskScope::new()),
            reporter,
            &hub,
        );
        Rig {
            hub,
            leds,
            display,
            notices,
        }
    }

    fn lit_cells(grid: &LedGrid) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        for (y, row) in grid.iter().enumerate() {
            for (x, &b) in row.iter().enumerate() {
                if b > 0 {
                    cells.push((x, y));
                }
            }
        }
        cells
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_show_supersedes_unstarted_one() {
        let rig = rig();
        let ever_lit = Rc::new(RefCell::new(BLANK));
        let seen = ever_lit.clone();
        rig.hub.subscribe_to("led-change", move |e| {
            if let BoardEvent::LedChange { x, y, value } = e {
                if *value > 0 {
                    seen.borrow_mut()[*y][*x] = *value;
                }
            }
        });

        let a = rig.display.show_text("A".into(), Duration::from_millis(150));
        let b = rig.display.show_text("B".into(), Duration::from_millis(150));
        futures::join!(a, b);

        assert_eq!(
            lit_cells(&ever_lit.borrow()),
            lit_cells(&font::char_frame('B'))
        );
        assert_eq!(rig.display.phase(), DisplayPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_ends_blank_and_idle() {
        let rig = rig();
        let start = tokio::time::Instant::now();
        rig.display
            .show_text("HI".into(), Duration::from_millis(100))
            .await;
        let frames = font::scroll_columns("HI").len() - GRID_SIZE;
        assert_eq!(start.elapsed(), Duration::from_millis(100) * frames as u32);
        assert!(rig.leds.grid().iter().flatten().all(|&b| b == 0));
        assert_eq!(rig.display.phase(), DisplayPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_returns_to_idle() {
        let rig = rig();
        let pending = rig.display.show_text("HELLO".into(), Duration::from_millis(100));
        assert!(matches!(rig.display.phase(), DisplayPhase::Animating(_)));
        drop(pending);
        assert_eq!(rig.display.phase(), DisplayPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_forever_is_ignored() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig();
                let first = Rc::new(Cell::new(0));
                let second = Rc::new(Cell::new(0));
                let f = first.clone();
                let s = second.clone();
                assert!(rig.display.forever(NativeFunction::sync("first", move |_| {
                    f.set(f.get() + 1);
                    Ok(Value::None)
                })));
                assert!(!rig.display.forever(NativeFunction::sync("second", move |_| {
                    s.set(s.get() + 1);
                    Ok(Value::None)
                })));

                sleep(Duration::from_millis(200)).await;
                assert!(first.get() >= 5, "first ran {} times", first.get());
                assert_eq!(second.get(), 0);
                assert_eq!(rig.notices.borrow().len(), 1);

                rig.hub.emit(BoardEvent::Reset {});
                assert!(!rig.display.forever_registered());
                let after_reset = first.get();
                sleep(Duration::from_millis(200)).await;
                assert!(first.get() <= after_reset + 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_forever_waits_for_animation() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig();
                let calls = Rc::new(Cell::new(0));
                let c = calls.clone();
                let d = rig.display.clone();
                rig.display.forever(NativeFunction::sync("loop", move |_| {
                    c.set(c.get() + 1);
                    // Starts an animation the loop must wait out.
                    tokio::task::spawn_local(d.show_frame(BLANK, Duration::from_millis(1000)));
                    Ok(Value::None)
                }));
                sleep(Duration::from_millis(1500)).await;
                assert_eq!(calls.get(), 2);
            })
            .await;
    }

    #[test]
    fn test_parse_pattern() {
        let frame = parse_pattern(
            "
            # . . . #
            . # . # .
            . . # . .
            . # . # .
            # . . . #
            ",
        )
        .unwrap();
        assert_eq!(frame[0][0], 255);
        assert_eq!(frame[0][1], 0);
        assert_eq!(frame[2][2], 255);
        assert!(parse_pattern("# . #").is_err());
        assert!(parse_pattern(&"x".repeat(25)).is_err());
    }
}
