use std::cell::Cell;
use std::time::Duration;

use tokio::time::Instant;

/// Board time: the runtime clock plus time spent in microsecond busy-waits.
///
/// `control.wait_micros` advances this clock instead of blocking the worker,
/// so pulse widths measured on pins reflect what the program asked for.
pub struct BoardClock {
    busy: Cell<Duration>,
    started: Cell<Instant>,
}

impl BoardClock {
    pub fn new() -> Self {
        Self {
            busy: Cell::new(Duration::ZERO),
            started: Cell::new(Instant::now()),
        }
    }

    pub fn now(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.busy.get()).unwrap_or(now)
    }

    pub fn busy_wait(&self, duration: Duration) {
        self.busy.set(self.busy.get().saturating_add(duration));
    }

    /// Time since the last restart.
    pub fn running_time(&self) -> Duration {
        self.now().saturating_duration_since(self.started.get())
    }

    pub fn restart(&self) {
        self.started.set(self.now());
    }
}

impl Default for BoardClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_busy_wait_advances_board_time_only() {
        let clock = BoardClock::new();
        let before = clock.now();
        clock.busy_wait(Duration::from_micros(10));
        assert_eq!(clock.now() - before, Duration::from_micros(10));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            clock.running_time(),
            Duration::from_millis(5) + Duration::from_micros(10)
        );
        clock.restart();
        assert_eq!(clock.running_time(), Duration::ZERO);
    }
}
