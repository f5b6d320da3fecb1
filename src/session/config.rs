//! Session configuration.
//!
//! Loaded from an optional JSON file, then overridden by command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Error, IdleStrategy, Result};
use crate::heartbeat::{ConsumerConfig, ProducerConfig};
use crate::transport::ShmConfig;

/// Configuration shared by the producer and consumer processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Location of the coordination record.
    pub record_path: PathBuf,

    /// Channel address written into the record by the producer.
    pub transport_address: String,

    /// Stream discriminator written into the record by the producer.
    pub stream_id: i32,

    /// Number of consumer roles the producer creates.
    /// Default: 2
    pub consumer_count: usize,

    /// How many of those roles are SLOW.
    /// Default: 1
    pub slow_count: usize,

    /// Fragments handed to the consumer per poll.
    /// Default: 16
    pub fragment_limit: usize,

    /// Backoff while waiting for a peer.
    /// Default: 1 ms
    pub connect_idle_us: u64,

    /// Producer backoff after congestion.
    /// Default: 1 ms
    pub congestion_idle_us: u64,

    /// FAST consumer idle after each heartbeat.
    /// Default: 100 ns
    pub fast_idle_ns: u64,

    /// SLOW consumer idle after each heartbeat.
    /// Default: 100 ms
    pub slow_idle_ns: u64,

    /// A peer silent for longer than this is treated as gone.
    /// Default: 1 s
    pub liveness_ttl_ms: u64,

    /// Slots in the shared-memory ring.
    /// Default: 1024
    pub ring_slots: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let root = std::env::temp_dir().join("pulse");
        Self {
            record_path: root.join("session.record"),
            transport_address: root.join("channel").display().to_string(),
            stream_id: 1001,
            consumer_count: 2,
            slow_count: 1,
            fragment_limit: 16,
            connect_idle_us: 1_000,
            congestion_idle_us: 1_000,
            fast_idle_ns: 100,
            slow_idle_ns: 100_000_000,
            liveness_ttl_ms: 1_000,
            ring_slots: 1024,
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data)
            .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.consumer_count == 0 {
            return Err(Error::InvalidConfig("consumer_count must be at least 1".into()));
        }
        if u32::try_from(self.consumer_count).is_err() {
            return Err(Error::InvalidConfig("consumer_count too large".into()));
        }
        if self.slow_count > self.consumer_count {
            return Err(Error::InvalidConfig(format!(
                "slow_count ({}) exceeds consumer_count ({})",
                self.slow_count, self.consumer_count
            )));
        }
        if self.fragment_limit == 0 {
            return Err(Error::InvalidConfig("fragment_limit must be at least 1".into()));
        }
        if self.ring_slots == 0 {
            return Err(Error::InvalidConfig("ring_slots must be at least 1".into()));
        }
        if self.transport_address.is_empty() {
            return Err(Error::InvalidConfig("transport_address is empty".into()));
        }
        Ok(())
    }

    pub fn connect_idle(&self) -> IdleStrategy {
        IdleStrategy::sleeping(Duration::from_micros(self.connect_idle_us))
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            connect_idle: self.connect_idle(),
            congestion_idle: IdleStrategy::sleeping(Duration::from_micros(self.congestion_idle_us)),
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            fragment_limit: self.fragment_limit,
            fast_idle: IdleStrategy::sleeping(Duration::from_nanos(self.fast_idle_ns)),
            slow_idle: IdleStrategy::sleeping(Duration::from_nanos(self.slow_idle_ns)),
        }
    }

    pub fn shm_config(&self) -> ShmConfig {
        ShmConfig {
            ring_slots: self.ring_slots,
            liveness_ttl: Duration::from_millis(self.liveness_ttl_ms),
        }
    }
}
