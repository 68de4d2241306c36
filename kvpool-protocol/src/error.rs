//! Protocol error types.

use thiserror::Error;

/// Errors raised while shaping a raw reply into its final value.
///
/// These are scoped to a single command's result and never affect the
/// health of the connection that carried it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("reply shape mismatch for {command}: expected {expected} elements, got {actual}")]
    ReplyShapeMismatch {
        command: String,
        expected: usize,
        actual: usize,
    },

    #[error("keyed reply for {command} has no recorded key list")]
    MissingKeyList { command: String },
}

impl ProtocolError {
    /// Returns the name of the command whose reply could not be shaped.
    pub fn command(&self) -> &str {
        match self {
            ProtocolError::ReplyShapeMismatch { command, .. } => command,
            ProtocolError::MissingKeyList { command } => command,
        }
    }
}
