//! Error types for the relay engine

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the relay engine
///
/// Every error is scoped to one publish call or one subscription; none is
/// fatal to the process.
#[derive(Error, Debug)]
pub enum Error {
    /// The backing history store is unreachable or failed a command
    #[error("history store unavailable: {0}")]
    StoreUnavailable(String),

    /// A channel name collides with a reserved control parameter
    #[error("channel name `{0}` is reserved")]
    ReservedChannelName(String),

    /// A subscription or redirect was requested without any channels
    #[error("at least one channel is required")]
    EmptyChannelSet,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
