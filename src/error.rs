//! Error taxonomy for the protocol engine.

use thiserror::Error;

/// Errors produced by the client and server drivers.
///
/// Variants map directly onto the failure taxonomy: sync validation errors
/// (`ConfigInvalid`, `AlreadyRunning`) are returned directly from
/// constructors and never surface as an [`crate::ClientEvent::Error`] or
/// [`crate::ServerEvent::Error`]; the rest are carried inside those events
/// when they terminate a running test.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration failed pre-I/O validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A client test (or server) was already running on this engine instance.
    #[error("a test is already running")]
    AlreadyRunning,

    /// Connect, read, or write failure, including unexpected EOF and
    /// close-during-operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed length prefix, oversized JSON body, or a short cookie read.
    #[error("framing error: {0}")]
    Framing(String),

    /// Unexpected state byte, a missing transition, or a peer-signalled
    /// abnormal state (access denied, server error, server terminate).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A connect or control-read deadline was exceeded.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The caller cancelled the test. Never reported via an `Error` event;
    /// this variant exists so internal plumbing can use `Result` uniformly.
    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            EngineError::Timeout(err.to_string())
        } else {
            EngineError::Transport(err.to_string())
        }
    }
}

impl EngineError {
    /// Human-readable message used to populate peer-signalled protocol
    /// states per the unexpected-state mapping table.
    pub fn access_denied() -> Self {
        EngineError::Protocol("Access denied by server".to_string())
    }

    pub fn server_error() -> Self {
        EngineError::Protocol("Server error".to_string())
    }

    pub fn server_terminated() -> Self {
        EngineError::Protocol("Server terminated the connection".to_string())
    }

    pub fn unexpected_state(state: impl std::fmt::Debug) -> Self {
        EngineError::Protocol(format!("Unexpected protocol state: {:?}", state))
    }
}

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
