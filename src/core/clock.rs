use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock nanoseconds for heartbeat stamps and channel liveness.
///
/// A heartbeat is stamped in the producer process and aged in a consumer
/// process, so every implementation reports nanoseconds since the UNIX epoch.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> u64;
}

/// Reads `SystemTime` on every call.
///
/// Used for liveness stamps in the shm table, where a few tens of nanoseconds
/// per read and the odd NTP step do not matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        wall_ns()
    }
}

/// TSC-backed clock for the heartbeat loops.
///
/// Captures the wall time once and then adds `quanta` ticks, so stamps are
/// cheap, never step backwards within a process and still line up with the
/// other side's wall time to within the initial read.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    ticks: quanta::Clock,
    anchor: quanta::Instant,
    anchor_wall_ns: u64,
}

impl QuantaClock {
    pub fn new() -> Self {
        let ticks = quanta::Clock::new();
        Self {
            anchor: ticks.now(),
            anchor_wall_ns: wall_ns(),
            ticks,
        }
    }
}

impl Default for QuantaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for QuantaClock {
    fn now(&self) -> u64 {
        let since_anchor = self.ticks.now().duration_since(self.anchor).as_nanos();
        self.anchor_wall_ns
            .saturating_add(u64::try_from(since_anchor).unwrap_or(u64::MAX))
    }
}

fn wall_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
