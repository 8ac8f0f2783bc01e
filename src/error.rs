//! Error types for the camera console core

use thiserror::Error;

/// Result type alias for console operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the console core
#[derive(Debug, Error)]
pub enum Error {
    /// Signaling channel failure (socket, envelope framing)
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Negotiation failure (SDP/ICE rejected, protocol violation)
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Underlying WebRTC stack failure
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The console event loop has shut down
    #[error("Console is shut down")]
    Shutdown,
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtc(err.to_string())
    }
}
