//! Transport boundary between the heartbeat loops and whatever moves bytes.
//!
//! The loops only see [`Publication`] and [`Subscription`]. Delivery is
//! best-effort: fragments may be dropped, but fragments from one publication
//! that do arrive keep their order.
//!
//! Two transports ship with the crate:
//!
//! - [`shm::ShmTransport`]: a memory-mapped broadcast ring shared between
//!   processes. This is what the binaries use.
//! - [`loopback::LoopbackTransport`]: an in-process transport for tests and
//!   single-process runs.

use std::fmt;

use crate::core::Result;

pub mod loopback;
pub mod lock;
pub mod shm;

pub use loopback::LoopbackTransport;
pub use shm::{ShmConfig, ShmTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    NotConnected,
    /// The slowest live subscriber is a full buffer behind. Retry after backoff.
    Congested,
}

/// Publish side of a channel.
pub trait Publication: Send {
    /// Whether at least one live subscriber is attached.
    fn is_connected(&self) -> bool;

    /// Offers one fragment without blocking.
    fn try_send(&mut self, payload: &[u8]) -> Result<SendOutcome>;
}

/// Subscribe side of a channel.
pub trait Subscription: Send {
    /// Whether the publisher is attached and alive.
    fn is_connected(&self) -> bool;

    /// Delivers up to `max_fragments` pending fragments to `handler`, in order,
    /// and returns how many were handled. Never blocks.
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]), max_fragments: usize) -> usize;
}

/// Opens endpoints for a channel address.
pub trait Transport {
    type Publication: Publication + 'static;
    type Subscription: Subscription + 'static;

    fn open_publish_endpoint(&self, address: &str, stream_id: i32) -> Result<Self::Publication>;

    /// Opens a subscription tagged with `ordinal` so the transport can tell
    /// consumers apart.
    fn open_subscribe_endpoint(
        &self,
        address: &str,
        stream_id: i32,
        ordinal: u32,
    ) -> Result<Self::Subscription>;
}

/// Human-readable channel name, optionally tagged with a consumer alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub address: String,
    pub stream_id: i32,
    pub alias: Option<u32>,
}

impl ChannelDescriptor {
    pub fn new(address: impl Into<String>, stream_id: i32) -> Self {
        Self {
            address: address.into(),
            stream_id,
            alias: None,
        }
    }

    pub fn tagged(&self, ordinal: u32) -> Self {
        Self {
            alias: Some(ordinal),
            ..self.clone()
        }
    }
}

impl fmt::Display for ChannelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?stream={}", self.address, self.stream_id)?;
        if let Some(alias) = self.alias {
            write!(f, "&alias={alias}")?;
        }
        Ok(())
    }
}
