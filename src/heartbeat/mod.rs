//! The two background loops and the flag that stops them.

pub mod consumer;
pub mod producer;
pub mod running;

pub use consumer::{run_consumer, ConsumerConfig, ConsumerReport};
pub use producer::{run_producer, ProducerConfig, ProducerExit, ProducerReport, ProducerStats};
pub use running::RunningFlag;
