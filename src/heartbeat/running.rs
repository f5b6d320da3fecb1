use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared by a process's main thread, its interrupt
/// handler and its background loop.
#[derive(Clone, Debug)]
pub struct RunningFlag {
    inner: Arc<AtomicBool>,
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    /// Clears the flag. Returns `true` only for the call that cleared it.
    pub fn stop(&self) -> bool {
        self.inner.swap(false, Ordering::AcqRel)
    }
}
