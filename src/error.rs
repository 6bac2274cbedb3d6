//! Relay error types
//!
//! The status vocabulary surfaced to transport adapters. Per-component
//! failures (buffer, dispatch) stay internal to their modules and only reach
//! the transport as engine status codes carried by [`RelayError::Engine`].

use crate::engine::EngineError;

/// Error type for relay operations
#[derive(Debug, Clone)]
pub enum RelayError {
    /// Requested stream id has no active publisher
    NotPlaying(String),
    /// Stream id already has a publisher (or a publish in progress)
    AlreadyPublishing(String),
    /// The session has been freed; no engine call was made
    AlreadyClosed,
    /// The engine reported a failure
    Engine(EngineError),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::NotPlaying(id) => write!(f, "stream is not playing: {}", id),
            RelayError::AlreadyPublishing(id) => {
                write!(f, "stream already has a publisher: {}", id)
            }
            RelayError::AlreadyClosed => write!(f, "session already closed"),
            RelayError::Engine(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<EngineError> for RelayError {
    fn from(e: EngineError) -> Self {
        RelayError::Engine(e)
    }
}
