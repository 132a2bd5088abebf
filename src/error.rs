//! Error types for the lobby and its signaling layer

/// Result type alias using the lobby Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating presence and calls.
///
/// Nothing here is process-fatal: every failure ends up either as a dropped
/// message or as a single session forced to `Closed`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Relay unreachable or closed
    #[error("Relay transport error: {0}")]
    Transport(String),

    /// Local media could not be acquired (permission denied, device busy)
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Malformed or unsupported session description or candidate
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Malformed relay frame
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Message or operation not accepted in the current session state
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The lobby task is no longer running
    #[error("Lobby has shut down")]
    Shutdown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Failures the user has to be told about (call setup only)
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Error::MediaAcquisition(_))
    }

    /// Failures resolved by trying again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::Negotiation(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
