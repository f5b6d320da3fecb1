//! Primitives shared by the coordination record, the transports and the loops.

pub mod clock;
pub mod error;
pub mod idle;
pub mod message;
pub mod mmap;

pub use clock::{Clock, QuantaClock, SystemClock};
pub use error::{Error, Result, EXIT_FAILURE, EXIT_NO_SLOTS};
pub use idle::IdleStrategy;
pub use message::{Message, MESSAGE_LEN, TIMESTAMP_LEN};
