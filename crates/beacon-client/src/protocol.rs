//! # Wire Protocol
//!
//! Message envelope spoken between the client and the broker.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Broker Protocol Messages                          │
//! │                                                                         │
//! │  AUTHENTICATION                                                        │
//! │  ──────────────                                                        │
//! │  CLIENT ───► Auth      { token }                                       │
//! │  BROKER ◄─── AuthOk    { uid, session_id }                             │
//! │                                                                         │
//! │  SYNC (after every connect)                                            │
//! │  ──────────────────────────                                            │
//! │  CLIENT ───► Sync      { since? }                                      │
//! │  BROKER ◄─── SyncOk    { messages: [...] }                             │
//! │                                                                         │
//! │  WRITE PATH                                                            │
//! │  ──────────                                                            │
//! │  CLIENT ───► Consume   { message }                                     │
//! │  BROKER ◄─── ConsumeOk {}                                              │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  CLIENT ───► Ping      {}                                              │
//! │  BROKER ◄─── Pong      {}                                              │
//! │                                                                         │
//! │  PUSH (broker-initiated)                                               │
//! │  ───────────────────────                                               │
//! │  BROKER ───► Broadcast { message }                                     │
//! │  CLIENT ◄─── BroadcastAck {} | Error { code, message }                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Messages are serialized as JSON with a `type` discriminator; requests
//! carry a `message_id` that the matching response echoes:
//! ```json
//! { "type": "auth", "payload": { "token": "..." }, "message_id": "..." }
//! ```
//! Opaque item bodies travel base64-encoded inside the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use beacon_core::{Message, Uid};

use crate::error::{ClientError, ClientResult};

// =============================================================================
// Envelope
// =============================================================================

/// Wire envelope with type discriminator and correlation ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub kind: WireKind,

    /// Type-specific payload.
    pub payload: serde_json::Value,

    /// Correlation ID: set on requests, echoed on responses. Absent on
    /// fire-and-forget frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Discriminator for wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireKind {
    // Client -> broker requests
    Auth,
    Sync,
    Consume,
    Ping,

    // Broker -> client responses
    AuthOk,
    SyncOk,
    ConsumeOk,
    Pong,

    // Broker-initiated push and its acknowledgement
    Broadcast,
    BroadcastAck,

    // Either direction
    Error,
}

impl WireMessage {
    /// Builds a request with a fresh correlation ID.
    pub fn request<T: Serialize>(kind: WireKind, payload: &T) -> ClientResult<Self> {
        Ok(WireMessage {
            kind,
            payload: serde_json::to_value(payload)?,
            message_id: Some(uuid::Uuid::new_v4().to_string()),
        })
    }

    /// Builds a response echoing the given correlation ID.
    pub fn response_to<T: Serialize>(
        request_id: &str,
        kind: WireKind,
        payload: &T,
    ) -> ClientResult<Self> {
        Ok(WireMessage {
            kind,
            payload: serde_json::to_value(payload)?,
            message_id: Some(request_id.to_string()),
        })
    }

    /// Builds an error response for a failed inbound request.
    pub fn error_response(request_id: &str, err: &ClientError) -> Self {
        WireMessage {
            kind: WireKind::Error,
            payload: serde_json::json!({
                "code": err.code(),
                "message": err.to_string(),
            }),
            message_id: Some(request_id.to_string()),
        }
    }

    pub fn to_json(&self) -> ClientResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> ClientResult<Self> {
        serde_json::from_str(json).map_err(|e| ClientError::Serialization(e.to_string()))
    }

    /// Extracts the typed payload.
    pub fn extract_payload<T: for<'de> Deserialize<'de>>(&self) -> ClientResult<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }

    /// Converts an `Error` frame into the matching [`ClientError`];
    /// passes every other frame through.
    pub fn into_result(self) -> ClientResult<WireMessage> {
        if self.kind != WireKind::Error {
            return Ok(self);
        }
        let payload: ErrorPayload = self.extract_payload()?;
        Err(ClientError::Remote {
            code: payload.code,
            message: payload.message,
        })
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// `Auth` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

/// `AuthOk` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOkPayload {
    /// The user the broker authenticated. Must byte-equal the local UID.
    pub uid: Uid,

    /// Server-assigned session identifier.
    pub session_id: String,
}

/// `Sync` request: everything after `since`, or a full dump when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

/// `SyncOk` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOkPayload {
    pub messages: Vec<Message>,
}

/// `Consume` request: publish one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumePayload {
    pub message: Message,
}

/// `Broadcast` push from the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub message: Message,
}

/// `Error` frame payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Empty payload for acks and pings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyPayload {}

// =============================================================================
// Helper Constructors
// =============================================================================

pub fn make_auth(token: &str) -> ClientResult<WireMessage> {
    WireMessage::request(
        WireKind::Auth,
        &AuthPayload {
            token: token.to_string(),
        },
    )
}

pub fn make_sync(since: Option<DateTime<Utc>>) -> ClientResult<WireMessage> {
    WireMessage::request(WireKind::Sync, &SyncPayload { since })
}

pub fn make_consume(message: Message) -> ClientResult<WireMessage> {
    WireMessage::request(WireKind::Consume, &ConsumePayload { message })
}

pub fn make_ping() -> ClientResult<WireMessage> {
    WireMessage::request(WireKind::Ping, &EmptyPayload {})
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let msg = make_auth("secret-token").unwrap();
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"auth\""));
        assert!(json.contains("secret-token"));

        let parsed = WireMessage::from_json(&json).unwrap();
        assert_eq!(parsed.kind, WireKind::Auth);
        assert!(parsed.message_id.is_some());
        let payload: AuthPayload = parsed.extract_payload().unwrap();
        assert_eq!(payload.token, "secret-token");
    }

    #[test]
    fn test_response_echoes_request_id() {
        let req = make_ping().unwrap();
        let req_id = req.message_id.clone().unwrap();
        let resp = WireMessage::response_to(&req_id, WireKind::Pong, &EmptyPayload {}).unwrap();
        assert_eq!(resp.message_id.as_deref(), Some(req_id.as_str()));
    }

    #[test]
    fn test_error_frame_into_result() {
        let err = ClientError::UnhandledSystem("weird.system".into());
        let frame = WireMessage::error_response("req-1", &err);
        let result = frame.into_result();
        match result {
            Err(ClientError::Remote { code, .. }) => assert_eq!(code, "unhandled_system"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_sync_since_omitted_when_none() {
        let msg = make_sync(None).unwrap();
        let json = msg.to_json().unwrap();
        assert!(!json.contains("since"));
    }
}
