use thiserror::Error;

/// Exit status for a consumer that arrives after every role has been claimed.
pub const EXIT_NO_SLOTS: i32 = 2;
/// Exit status for any other fatal condition.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("coordination record not found")]
    NotFound,
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("no more consumer roles available")]
    NoSlotsRemaining,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("publisher already active")]
    PublisherAlreadyActive,
    #[error("channel not ready")]
    ChannelNotReady,
    #[error("channel subscriber table full")]
    ChannelFull,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("{0} loop panicked")]
    LoopPanicked(String),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NoSlotsRemaining => EXIT_NO_SLOTS,
            _ => EXIT_FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
