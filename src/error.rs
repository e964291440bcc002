//! Error types
//!
//! A single error enum covers the transport, the service registry and the
//! application protocols built on top of them. Transport failures bubble up
//! to the call site as typed variants so callers can tell an absent peer
//! (`NoResponders`) from a slow one (`Timeout`).

use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bus, registry and protocol operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The broker could not be reached or refused the connection
    #[error("connection failed: {0}")]
    Connection(String),

    /// Operation attempted while the session is not connected
    #[error("session is not connected")]
    Disconnected,

    /// The session was closed by its owner
    #[error("session closed")]
    Closed,

    /// A request was not answered within its bound
    #[error("request on '{subject}' timed out after {after:?}")]
    Timeout { subject: String, after: Duration },

    /// Nothing is listening on the requested subject
    #[error("no responders on '{0}'")]
    NoResponders(String),

    /// A service or endpoint could not be registered
    #[error("registration failed: {0}")]
    Registration(String),

    /// A payload exceeds the server's limit
    #[error("payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// The peer's current state does not allow the operation
    #[error("rejected: {0}")]
    Rejected(String),

    /// A subject or subject pattern is malformed
    #[error("invalid subject: '{0}'")]
    InvalidSubject(String),

    /// The responder answered with a service error
    #[error("service error {code}: {description}")]
    Service { code: String, description: String },

    /// A durable stream does not exist
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// A payload could not be encoded or decoded
    #[error("payload encoding: {0}")]
    Json(#[from] serde_json::Error),

    /// Local storage failure
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may reasonably try the operation again
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::NoResponders(_) | Error::Disconnected
        )
    }

    /// Whether this is a request timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
