//! Heartbeat wire format.
//!
//! A heartbeat is a fixed 64-byte payload. Bytes `0..8` hold the producer's
//! nanosecond timestamp (little-endian); the rest is reserved and zeroed.

use crate::core::{Error, Result};

pub const MESSAGE_LEN: usize = 64;
pub const TIMESTAMP_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    pub timestamp_ns: u64,
}

impl Message {
    pub fn new(timestamp_ns: u64) -> Self {
        Self { timestamp_ns }
    }

    pub fn encode(&self) -> [u8; MESSAGE_LEN] {
        let mut buf = [0u8; MESSAGE_LEN];
        self.encode_into(&mut buf);
        buf
    }

    /// Writes the timestamp field in place; reserved bytes are left untouched.
    pub fn encode_into(&self, buf: &mut [u8; MESSAGE_LEN]) {
        buf[..TIMESTAMP_LEN].copy_from_slice(&self.timestamp_ns.to_le_bytes());
    }

    /// Decodes a received fragment. Fragments shorter than the timestamp field
    /// are rejected rather than read past their end.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let field = payload
            .get(..TIMESTAMP_LEN)
            .ok_or(Error::Corrupt("heartbeat fragment shorter than timestamp"))?;
        let mut raw = [0u8; TIMESTAMP_LEN];
        raw.copy_from_slice(field);
        Ok(Self {
            timestamp_ns: u64::from_le_bytes(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_sits_in_first_eight_bytes() {
        let buf = Message::new(0x0102_0304_0506_0708).encode();
        assert_eq!(&buf[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert!(buf[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn undersized_fragment_is_rejected() {
        assert!(matches!(Message::decode(&[1, 2, 3]), Err(Error::Corrupt(_))));
        assert!(Message::decode(&[]).is_err());
    }

    #[test]
    fn exactly_eight_bytes_decodes() {
        let msg = Message::decode(&42u64.to_le_bytes()).expect("decode");
        assert_eq!(msg.timestamp_ns, 42);
    }
}
