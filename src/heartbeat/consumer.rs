//! Consumer loop: detect one heartbeat at a time, then idle for a role-dependent
//! duration.

use std::time::Duration;

use hdrhistogram::Histogram;
use log::info;

use crate::coord::Role;
use crate::core::{Clock, Error, IdleStrategy, Message, Result};
use crate::heartbeat::RunningFlag;
use crate::transport::Subscription;

pub const DEFAULT_FRAGMENT_LIMIT: usize = 16;
pub const DEFAULT_FAST_IDLE: Duration = Duration::from_nanos(100);
pub const DEFAULT_SLOW_IDLE: Duration = Duration::from_millis(100);

const LATENCY_MAX_NS: u64 = 60_000_000_000;

#[derive(Clone, Copy, Debug)]
pub struct ConsumerConfig {
    pub fragment_limit: usize,
    pub fast_idle: IdleStrategy,
    pub slow_idle: IdleStrategy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
            fast_idle: IdleStrategy::Sleep(DEFAULT_FAST_IDLE),
            slow_idle: IdleStrategy::Sleep(DEFAULT_SLOW_IDLE),
        }
    }
}

impl ConsumerConfig {
    pub fn idle_for(&self, role: Role) -> IdleStrategy {
        match role {
            Role::Fast => self.fast_idle,
            Role::Slow => self.slow_idle,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConsumerReport {
    /// Outer iterations that detected a heartbeat.
    pub observed: u64,
    /// Fragments delivered by the transport, including ones batched into the
    /// same detection.
    pub fragments: u64,
    /// Fragments too short to carry a timestamp.
    pub rejected: u64,
    pub last_timestamp_ns: Option<u64>,
    /// Clock reading at detection minus the heartbeat's timestamp, in ns.
    pub latency: Histogram<u64>,
}

impl ConsumerReport {
    fn new() -> Result<Self> {
        let latency = Histogram::new_with_bounds(1, LATENCY_MAX_NS, 3)
            .map_err(|_| Error::Unsupported("latency histogram bounds"))?;
        Ok(Self {
            observed: 0,
            fragments: 0,
            rejected: 0,
            last_timestamp_ns: None,
            latency,
        })
    }
}

/// Runs until the flag clears. Buffered heartbeats are left behind on exit.
///
/// Detection is a busy poll with no backoff; the flag is rechecked between
/// polls so shutdown never waits on a heartbeat that will not come.
pub fn run_consumer<S, C>(
    subscription: &mut S,
    clock: &C,
    role: Role,
    running: &RunningFlag,
    config: &ConsumerConfig,
) -> Result<ConsumerReport>
where
    S: Subscription + ?Sized,
    C: Clock,
{
    let idle = config.idle_for(role);
    let mut report = ConsumerReport::new()?;

    'outer: while running.is_running() {
        let mut latest: Option<u64> = None;
        while latest.is_none() {
            if !running.is_running() {
                break 'outer;
            }
            let mut rejected = 0;
            let handled = subscription.poll(
                &mut |payload| match Message::decode(payload) {
                    Ok(message) => latest = Some(message.timestamp_ns),
                    Err(_) => rejected += 1,
                },
                config.fragment_limit,
            );
            report.fragments += handled as u64;
            report.rejected += rejected;
        }

        if let Some(timestamp_ns) = latest {
            report.observed += 1;
            report.last_timestamp_ns = Some(timestamp_ns);
            report
                .latency
                .saturating_record(clock.now().saturating_sub(timestamp_ns).max(1));
        }
        idle.idle();
    }

    info!(
        "{role} consumer stopped: {} heartbeats observed, {} fragments, {} rejected",
        report.observed, report.fragments, report.rejected
    );
    Ok(report)
}
