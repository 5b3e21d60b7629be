//! Ownership of program-driven tasks so a reset can cancel them together.

use std::cell::RefCell;
use std::future::Future;

use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// Tasks spawned on the current `LocalSet` on behalf of the running program.
#[derive(Default)]
pub struct TaskScope {
    handles: RefCell<Vec<AbortHandle>>,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` on the local set and track it for [`abort_all`](Self::abort_all).
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let handle = tokio::task::spawn_local(future);
        let mut handles = self.handles.borrow_mut();
        handles.retain(|h| !h.is_finished());
        handles.push(handle.abort_handle());
        handle
    }

    /// Cancel every tracked task. Cancellation takes effect at each task's
    /// next suspension point.
    pub fn abort_all(&self) {
        let handles: Vec<AbortHandle> = self.handles.borrow_mut().drain(..).collect();
        let live = handles.iter().filter(|h| !h.is_finished()).count();
        if live > 0 {
            debug!(tasks = live, "aborting program tasks");
        }
        for handle in handles {
            handle.abort();
        }
    }

    pub fn active(&self) -> usize {
        self.handles
            .borrow()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}
