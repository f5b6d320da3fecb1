//! Heartbeat producer with speed-classified consumers.
//!
//! A producer publishes a coordination record naming the channel and one role
//! (FAST or SLOW) per expected consumer, then streams timestamped heartbeats as
//! fast as the channel accepts them. Each consumer process atomically claims
//! the next role from the record and consumes heartbeats at that role's pace;
//! the user then guesses which kind of consumer they are running.
//!
//! - [`coord`]: roles, the coordination record and its durable store.
//! - [`transport`]: the publish/subscribe boundary and its shared-memory and
//!   in-process implementations.
//! - [`heartbeat`]: the producer and consumer loops.
//! - [`session`]: process lifecycle used by the binaries.

pub mod coord;
pub mod core;
pub mod heartbeat;
pub mod session;
pub mod transport;

pub use crate::core::{Error, Result};
