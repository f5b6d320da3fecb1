use std::thread::{self, JoinHandle};

use log::warn;

use crate::core::{Error, Result};
use crate::heartbeat::RunningFlag;

/// Owns a background loop thread. Dropping the guard stops and joins it.
pub struct LoopGuard<T> {
    name: String,
    running: RunningFlag,
    handle: Option<JoinHandle<Result<T>>>,
}

impl<T: Send + 'static> LoopGuard<T> {
    /// Spawns `body` on a named thread. `body` receives its own handle to
    /// `running` and is expected to return once the flag clears.
    pub fn spawn<F>(name: &str, running: RunningFlag, body: F) -> Result<Self>
    where
        F: FnOnce(RunningFlag) -> Result<T> + Send + 'static,
    {
        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_running))?;
        Ok(Self {
            name: name.to_string(),
            running,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Clears the running flag and waits for the loop to return.
    pub fn stop_and_join(mut self) -> Result<T> {
        self.running.stop();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::LoopPanicked(self.name.clone()))?,
            None => Err(Error::LoopPanicked(self.name.clone())),
        }
    }
}

impl<T> Drop for LoopGuard<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.running.stop();
            if handle.join().is_err() {
                warn!("{} loop panicked during shutdown", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn spin_until_stopped(running: RunningFlag) -> Result<u64> {
        let mut turns = 0;
        while running.is_running() {
            turns += 1;
            thread::sleep(Duration::from_millis(1));
        }
        Ok(turns)
    }

    #[test]
    fn stop_and_join_returns_loop_result() {
        let running = RunningFlag::new();
        let guard = LoopGuard::spawn("test-loop", running.clone(), spin_until_stopped)
            .expect("spawn");
        thread::sleep(Duration::from_millis(5));
        assert!(!guard.is_finished());
        guard.stop_and_join().expect("join");
        assert!(!running.is_running());
    }

    #[test]
    fn drop_stops_the_loop() {
        let exited = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&exited);
        let running = RunningFlag::new();
        {
            let _guard = LoopGuard::spawn("test-loop", running.clone(), move |running| {
                spin_until_stopped(running)?;
                seen.store(true, Ordering::Release);
                Ok(())
            })
            .expect("spawn");
        }
        assert!(exited.load(Ordering::Acquire));
    }

    #[test]
    fn panicking_loop_is_reported() {
        let guard: LoopGuard<()> =
            LoopGuard::spawn("boom", RunningFlag::new(), |_| panic!("loop failure"))
                .expect("spawn");
        assert!(matches!(guard.stop_and_join(), Err(Error::LoopPanicked(name)) if name == "boom"));
    }
}
