use thiserror::Error;

/// Errors surfaced by the backend client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("backend not connected")]
    NotConnected,

    #[error("connection was closed")]
    ConnectionClosed,

    /// The backend answered with an application-level error.
    #[error("backend error: {0}")]
    Rpc(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("{method} request timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),
}
