use log::{info, warn};

use crate::core::{Error, Result};
use crate::heartbeat::RunningFlag;

/// Exit status after a second interrupt, matching the shell's 128 + SIGINT.
pub const EXIT_INTERRUPTED: i32 = 130;

/// The first SIGINT/SIGTERM clears `running`. A second one exits immediately,
/// which is the only way out of a blocking prompt read.
///
/// Can be installed once per process.
pub fn install_interrupt_handler(running: &RunningFlag) -> Result<()> {
    let running = running.clone();
    ctrlc::set_handler(move || {
        if running.stop() {
            info!("interrupt received, shutting down");
        } else {
            warn!("second interrupt, exiting");
            std::process::exit(EXIT_INTERRUPTED);
        }
    })
    .map_err(|_| Error::Unsupported("interrupt handler already installed"))
}
