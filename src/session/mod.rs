//! Producer and consumer process lifecycle.

pub mod bootstrap;
pub mod config;
pub mod guard;
pub mod outcome;
#[cfg(feature = "cli")]
pub mod signal;
pub mod state;

pub use bootstrap::{ConsumerSummary, ProducerSummary, SessionBootstrap};
pub use config::SessionConfig;
pub use guard::LoopGuard;
pub use outcome::{check_outcome, parse_guess, Outcome};
#[cfg(feature = "cli")]
pub use signal::install_interrupt_handler;
pub use state::SessionState;
