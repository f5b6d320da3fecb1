//! Producer loop: publish timestamped heartbeats as fast as the transport accepts them.

use std::time::Duration;

use log::{info, warn};

use crate::core::{Clock, IdleStrategy, Message, Result, MESSAGE_LEN};
use crate::heartbeat::RunningFlag;
use crate::transport::{Publication, SendOutcome};

pub const DEFAULT_CONNECT_IDLE: Duration = Duration::from_millis(1);
pub const DEFAULT_CONGESTION_IDLE: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug)]
pub struct ProducerConfig {
    /// Backoff while waiting for the first subscriber.
    pub connect_idle: IdleStrategy,
    /// Backoff after the transport reports congestion.
    pub congestion_idle: IdleStrategy,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            connect_idle: IdleStrategy::Sleep(DEFAULT_CONNECT_IDLE),
            congestion_idle: IdleStrategy::Sleep(DEFAULT_CONGESTION_IDLE),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerExit {
    /// The running flag cleared before any subscriber connected.
    StoppedBeforeConnect,
    /// The running flag cleared while publishing.
    Stopped,
    /// The transport reported `NotConnected` after having been connected.
    ConnectionLost,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub sent: u64,
    pub congested: u64,
    pub last_timestamp_ns: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProducerReport {
    pub exit: ProducerExit,
    pub stats: ProducerStats,
}

/// Runs until the flag clears or the connection is lost.
///
/// Sends are never retried: a congested heartbeat is dropped and the next
/// attempt carries a fresh timestamp.
pub fn run_producer<P, C>(
    publication: &mut P,
    clock: &C,
    running: &RunningFlag,
    config: &ProducerConfig,
) -> Result<ProducerReport>
where
    P: Publication + ?Sized,
    C: Clock,
{
    let mut stats = ProducerStats::default();

    loop {
        if !running.is_running() {
            info!("producer stopped before any subscriber connected");
            return Ok(ProducerReport {
                exit: ProducerExit::StoppedBeforeConnect,
                stats,
            });
        }
        if publication.is_connected() {
            break;
        }
        config.connect_idle.idle();
    }
    info!("publication connected, publishing heartbeats");

    let mut buf = [0u8; MESSAGE_LEN];
    while running.is_running() {
        let timestamp_ns = clock.now();
        Message::new(timestamp_ns).encode_into(&mut buf);
        match publication.try_send(&buf)? {
            SendOutcome::Sent => {
                stats.sent += 1;
                stats.last_timestamp_ns = Some(timestamp_ns);
            }
            SendOutcome::Congested => {
                stats.congested += 1;
                config.congestion_idle.idle();
            }
            SendOutcome::NotConnected => {
                warn!("publication lost its subscribers after {} heartbeats", stats.sent);
                return Ok(ProducerReport {
                    exit: ProducerExit::ConnectionLost,
                    stats,
                });
            }
        }
    }

    info!(
        "producer stopped: {} sent, {} congested",
        stats.sent, stats.congested
    );
    Ok(ProducerReport {
        exit: ProducerExit::Stopped,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SystemClock;

    struct NeverConnected;

    impl Publication for NeverConnected {
        fn is_connected(&self) -> bool {
            false
        }

        fn try_send(&mut self, _payload: &[u8]) -> Result<SendOutcome> {
            panic!("must not send before connecting");
        }
    }

    struct DropsAfter {
        remaining: u32,
    }

    impl Publication for DropsAfter {
        fn is_connected(&self) -> bool {
            true
        }

        fn try_send(&mut self, _payload: &[u8]) -> Result<SendOutcome> {
            if self.remaining == 0 {
                return Ok(SendOutcome::NotConnected);
            }
            self.remaining -= 1;
            Ok(SendOutcome::Sent)
        }
    }

    #[test]
    fn stopped_flag_exits_without_sending() {
        let running = RunningFlag::new();
        running.stop();
        let report = run_producer(
            &mut NeverConnected,
            &SystemClock,
            &running,
            &ProducerConfig::default(),
        )
        .expect("run");
        assert_eq!(report.exit, ProducerExit::StoppedBeforeConnect);
        assert_eq!(report.stats.sent, 0);
    }

    #[test]
    fn connection_loss_ends_the_loop() {
        let running = RunningFlag::new();
        let mut publication = DropsAfter { remaining: 3 };
        let report = run_producer(
            &mut publication,
            &SystemClock,
            &running,
            &ProducerConfig::default(),
        )
        .expect("run");
        assert_eq!(report.exit, ProducerExit::ConnectionLost);
        assert_eq!(report.stats.sent, 3);
        assert!(running.is_running());
    }
}
