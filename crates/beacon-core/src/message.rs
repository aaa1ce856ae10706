//! # Message Model
//!
//! In-band messages mutate per-user state; out-of-band messages are
//! transient events that are never stored.
//!
//! ## Message Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Broadcast Unit                                  │
//! │                                                                         │
//! │  Message                                                               │
//! │  ├── ibm: Option<InBandMessage>                                        │
//! │  │        ├── StateSync   { md, items }      bulk replacement          │
//! │  │        └── StateUpdate { md, creation?, dismissal? }                │
//! │  │                              │                  │                    │
//! │  │                       one new Item     msg IDs and/or ranges        │
//! │  │                                        to remove                     │
//! │  └── oobm: Option<OutOfBandMessage>                                    │
//! │           { uid, system, body }          ephemeral, never stored       │
//! │                                                                         │
//! │  Both halves absent ⇒ invalid message.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Body, Category, DeviceId, Item, MsgId, Uid};

// =============================================================================
// Metadata
// =============================================================================

/// Common header carried by every in-band message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// User this message belongs to.
    pub uid: Uid,

    /// Unique identifier of this message.
    pub msg_id: MsgId,

    /// Originating device, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,

    /// Server-assigned creation time. Templates built locally carry the
    /// epoch until the broker stamps the echo.
    #[serde(default = "epoch")]
    pub ctime: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

// =============================================================================
// State Updates
// =============================================================================

/// Payload of a creation: the category and body of the new item. Its
/// message ID and creation time are those of the enclosing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creation {
    pub category: Category,
    pub body: Body,
}

/// A time/category range of items to dismiss.
///
/// Ranges are accepted on the wire but not applied; the state machine
/// records them and moves on (see [`crate::state::StateMachine`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DismissalRange {
    /// Restrict the range to one category, or all when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    /// Items created at or before this instant fall inside the range.
    pub end_time: DateTime<Utc>,
}

/// Removal instructions: explicit message IDs and/or ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dismissal {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub msg_ids: Vec<MsgId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<DismissalRange>,
}

/// Incremental state mutation: an optional creation and/or an optional
/// dismissal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub md: Metadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<Creation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissal: Option<Dismissal>,
}

impl StateUpdate {
    /// Materializes the creation (if any) as a full [`Item`], stamping it
    /// with the message's ID and creation time.
    pub fn creation_item(&self) -> Option<Item> {
        self.creation.as_ref().map(|c| Item {
            msg_id: self.md.msg_id.clone(),
            category: c.category.clone(),
            body: c.body.clone(),
            ctime: self.md.ctime,
        })
    }
}

// =============================================================================
// State Sync
// =============================================================================

/// Bulk replacement carrying the full item set. Sent on server-initiated
/// sync only; handlers never see these directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSync {
    pub md: Metadata,
    pub items: Vec<Item>,
}

// =============================================================================
// In-Band Message
// =============================================================================

/// A message that mutates per-user state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InBandMessage {
    StateSync(StateSync),
    StateUpdate(StateUpdate),
}

impl InBandMessage {
    pub fn metadata(&self) -> &Metadata {
        match self {
            InBandMessage::StateSync(s) => &s.md,
            InBandMessage::StateUpdate(u) => &u.md,
        }
    }

    pub fn msg_id(&self) -> &MsgId {
        &self.metadata().msg_id
    }

    pub fn ctime(&self) -> DateTime<Utc> {
        self.metadata().ctime
    }

    /// Returns the state update, or `None` for sync messages.
    pub fn as_state_update(&self) -> Option<&StateUpdate> {
        match self {
            InBandMessage::StateUpdate(u) => Some(u),
            InBandMessage::StateSync(_) => None,
        }
    }
}

// =============================================================================
// Out-Of-Band Message
// =============================================================================

/// Transient event with a system tag. Never enters the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfBandMessage {
    pub uid: Uid,

    /// Routing tag, e.g. `chat.activity` or `internal.reconnect`.
    pub system: String,

    #[serde(default, skip_serializing_if = "Body::is_empty")]
    pub body: Body,
}

// =============================================================================
// Broadcast Unit
// =============================================================================

/// The unit the broker broadcasts: an in-band half, an out-of-band half,
/// or (invalidly) neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ibm: Option<InBandMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oobm: Option<OutOfBandMessage>,
}

impl Message {
    pub fn in_band(ibm: InBandMessage) -> Self {
        Message {
            ibm: Some(ibm),
            oobm: None,
        }
    }

    pub fn out_of_band(oobm: OutOfBandMessage) -> Self {
        Message {
            ibm: None,
            oobm: Some(oobm),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn md(msg_id: &[u8]) -> Metadata {
        Metadata {
            uid: Uid::from_bytes(vec![0xaa]).unwrap(),
            msg_id: MsgId::from_bytes(msg_id.to_vec()).unwrap(),
            device_id: None,
            ctime: Utc::now(),
        }
    }

    #[test]
    fn test_creation_item_inherits_metadata() {
        let update = StateUpdate {
            md: md(&[1]),
            creation: Some(Creation {
                category: Category::new("tracker"),
                body: Body::new(b"x".to_vec()),
            }),
            dismissal: None,
        };
        let item = update.creation_item().unwrap();
        assert_eq!(item.msg_id, update.md.msg_id);
        assert_eq!(item.ctime, update.md.ctime);
        assert_eq!(item.category.as_str(), "tracker");
    }

    #[test]
    fn test_in_band_serde_round_trip() {
        let ibm = InBandMessage::StateUpdate(StateUpdate {
            md: md(&[2]),
            creation: None,
            dismissal: Some(Dismissal {
                msg_ids: vec![MsgId::from_bytes(vec![1]).unwrap()],
                ranges: Vec::new(),
            }),
        });
        let json = serde_json::to_string(&ibm).unwrap();
        assert!(json.contains("\"kind\":\"state_update\""));
        let back: InBandMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ibm);
    }

    #[test]
    fn test_message_halves() {
        let oobm = OutOfBandMessage {
            uid: Uid::from_bytes(vec![0xaa]).unwrap(),
            system: "chat.activity".into(),
            body: Body::default(),
        };
        let msg = Message::out_of_band(oobm);
        assert!(msg.ibm.is_none());
        assert!(msg.oobm.is_some());
    }
}
