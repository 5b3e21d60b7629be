//! Common test helper functions.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Write `source` to `dir/name` and return the path.
pub fn write_program(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, source).expect("write program fixture");
    path
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
///
/// The worker runs on its own thread with a real clock, so proxy tests wait
/// for effects instead of advancing paused time.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
