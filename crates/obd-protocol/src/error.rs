//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur while talking to an adapter
///
/// These never cross the public command path: a failed command is reported
/// as an empty response. They exist so the transport and drivers can log
/// precisely what went wrong.
#[derive(Debug, Error)]
pub enum ObdError {
    /// Byte stream I/O failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Could not open the link to the adapter
    #[error("Connection to {target} failed: {reason}")]
    ConnectFailed { target: String, reason: String },

    /// Adapter not responding
    #[error("OBD adapter not responding")]
    AdapterNotResponding,

    /// The link has been closed or was lost
    #[error("Adapter link is not connected")]
    NotConnected,
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::Transport(err.to_string())
    }
}
