//! # Client Error Types
//!
//! Error taxonomy for the push client.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Client Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Transport    │  │   Auth (fatal)  │  │     Broadcast           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Connection     │  │  AuthFailed     │  │  Repeat                 │ │
//! │  │  WebSocket      │  │  NotLoggedIn    │  │  UnhandledSystem        │ │
//! │  │  Disconnected   │  │                 │  │  InvalidMessage         │ │
//! │  │  Timeout        │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Transport errors feed the reconnect loop. Auth errors suppress the    │
//! │  next reconnect attempt. Broadcast errors are surfaced to the broker   │
//! │  and never abort the pipeline.                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use beacon_core::{CoreError, MsgId};
use beacon_store::StoreError;
use thiserror::Error;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Push client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    // =========================================================================
    // Transport
    // =========================================================================
    /// An outbound RPC exceeded its per-call deadline. Distinguished from
    /// remote errors so the ping loop can tear the connection down.
    #[error("network request timed out")]
    Timeout,

    /// Dial failure or broken transport.
    #[error("connection failed: {0}")]
    Connection(String),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The connection is gone; the call was abandoned.
    #[error("disconnected from broker")]
    Disconnected,

    /// Connect was given an unusable URI.
    #[error("invalid broker uri: {0}")]
    InvalidUri(String),

    /// No bundled root CA for a TLS host.
    #[error("no bundled CA for host {0}")]
    MissingCa(String),

    // =========================================================================
    // Authentication (permanent)
    // =========================================================================
    /// The broker rejected the session, or the returned UID did not match
    /// ours. Suppresses the next reconnect attempt.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No usable session token is available.
    #[error("not logged in: no session token")]
    NotLoggedIn,

    // =========================================================================
    // Broadcast pipeline
    // =========================================================================
    /// An in-band message whose ID is already in local state.
    #[error("ignored repeat message {msg_id}")]
    Repeat { msg_id: MsgId },

    /// An out-of-band message with a system tag no handler claims.
    #[error("unhandled system: {0}")]
    UnhandledSystem(String),

    /// A broadcast with neither half populated.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    // =========================================================================
    // Plumbing
    // =========================================================================
    /// The broker answered a call with an error frame.
    #[error("broker error {code}: {message}")]
    Remote { code: String, message: String },

    /// Wire encode/decode failure.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// An internal channel closed underneath us.
    #[error("channel error: {0}")]
    Channel(String),

    /// The client is shutting down.
    #[error("push client is shutting down")]
    ShuttingDown,

    /// Configuration file could not be loaded or was invalid.
    #[error("config error: {0}")]
    Config(String),

    /// Local persistence failed. Non-fatal: the state machine proceeds in
    /// memory and the next server sync restores consistency.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Conversions
// =============================================================================

impl From<CoreError> for ClientError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AlreadyPresent { msg_id } => ClientError::Repeat { msg_id },
            CoreError::InvalidMessage(m) => ClientError::InvalidMessage(m),
            other => ClientError::Serialization(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUri(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ClientError::Disconnected,
            WsError::Io(io) => ClientError::Connection(io.to_string()),
            WsError::Tls(tls) => ClientError::Connection(tls.to_string()),
            other => ClientError::WebSocket(other.to_string()),
        }
    }
}

// =============================================================================
// Categorization
// =============================================================================

impl ClientError {
    /// True for failures the reconnect loop should absorb.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout
                | ClientError::Connection(_)
                | ClientError::WebSocket(_)
                | ClientError::Disconnected
        )
    }

    /// True for auth failures that must suppress the next reconnect.
    pub fn is_auth_permanent(&self) -> bool {
        matches!(self, ClientError::AuthFailed(_) | ClientError::NotLoggedIn)
    }

    /// True when an in-band repeat was reported.
    pub fn is_repeat(&self) -> bool {
        matches!(self, ClientError::Repeat { .. })
    }

    /// Short machine-readable code used in wire error frames.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Timeout => "timeout",
            ClientError::Repeat { .. } => "repeat",
            ClientError::UnhandledSystem(_) => "unhandled_system",
            ClientError::InvalidMessage(_) => "invalid_message",
            ClientError::AuthFailed(_) | ClientError::NotLoggedIn => "auth_failed",
            _ => "internal",
        }
    }
}
