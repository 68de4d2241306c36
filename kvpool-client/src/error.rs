//! Client error types.

use kvpool_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server error: {0}")]
    Server(String),

    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Returns whether the failure is tied to the link rather than the command.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, TransportError::Io(_) | TransportError::Closed)
    }
}

/// Pool-level faults.
///
/// Handshake failures end only the attempt that raised them. The pool keeps
/// its backlog and the next `execute` on an empty pool starts a new attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    #[error("failed to connect to {addr}: {detail}")]
    ConnectFailure { addr: String, detail: String },

    #[error("authentication failed on {addr}: {detail}")]
    AuthFailure { addr: String, detail: String },

    #[error("namespace select failed on {addr}: {detail}")]
    NamespaceSelectFailure { addr: String, detail: String },

    #[error("took {timeout:?} to connect to {addr}, server went away")]
    ReconnectTimeout { addr: String, timeout: Duration },

    #[error("pool {0} is shut down")]
    Shutdown(String),
}

impl PoolError {
    /// Returns whether this fault ended a reconnect attempt.
    pub fn is_handshake_failure(&self) -> bool {
        !matches!(self, PoolError::Shutdown(_))
    }
}

/// Error delivered as the result of a single command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// The store answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// The link failed while the command was in flight.
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Reply(#[from] ProtocolError),
}

impl From<TransportError> for CommandError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Server(message) => CommandError::Server(message),
            other => CommandError::Transport(other.to_string()),
        }
    }
}
