use std::time::Duration;

/// How a loop spends the time between productive iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleStrategy {
    /// True busy-spinning. Burns 100% CPU on a single core for maximum responsiveness.
    BusySpin,
    /// Gives the rest of the time slice back to the scheduler.
    Yield,
    /// Low-priority periodic polling: parks the thread for a fixed duration.
    Sleep(Duration),
}

impl IdleStrategy {
    pub fn sleeping(duration: Duration) -> Self {
        if duration.is_zero() {
            IdleStrategy::BusySpin
        } else {
            IdleStrategy::Sleep(duration)
        }
    }

    pub fn idle(&self) {
        match self {
            IdleStrategy::BusySpin => std::hint::spin_loop(),
            IdleStrategy::Yield => std::thread::yield_now(),
            IdleStrategy::Sleep(duration) => std::thread::sleep(*duration),
        }
    }
}

impl Default for IdleStrategy {
    fn default() -> Self {
        IdleStrategy::Sleep(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn zero_sleep_degrades_to_spin() {
        assert_eq!(IdleStrategy::sleeping(Duration::ZERO), IdleStrategy::BusySpin);
        assert_eq!(
            IdleStrategy::sleeping(Duration::from_millis(2)),
            IdleStrategy::Sleep(Duration::from_millis(2))
        );
    }

    #[test]
    fn sleep_waits_at_least_the_duration() {
        let strategy = IdleStrategy::Sleep(Duration::from_millis(5));
        let start = Instant::now();
        strategy.idle();
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
