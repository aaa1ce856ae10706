//! Domain error types for beacon-core.

use thiserror::Error;

use crate::types::MsgId;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the domain layer.
///
/// `AlreadyPresent` is the load-bearing variant: the broadcast pipeline
/// uses it to report repeated messages to callers without touching state.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A creation carried a message ID that is already in the state.
    #[error("message {msg_id} already present in state")]
    AlreadyPresent { msg_id: MsgId },

    /// A message with neither an in-band nor an out-of-band half.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// An identifier could not be built from the given raw bytes.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// State snapshot could not be encoded or decoded.
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns true if this error reports a repeated message.
    pub fn is_repeat(&self) -> bool {
        matches!(self, CoreError::AlreadyPresent { .. })
    }
}
