//! # Identifier and Payload Types
//!
//! Opaque byte identifiers and the [`Item`] unit of state.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Core Types                                     │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Uid        │   │     MsgId       │   │    DeviceId     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  user identity  │   │  16 random      │   │  this device    │       │
//! │  │  hex on wire    │   │  bytes, unique  │   │  hex on wire    │       │
//! │  │                 │   │  per message    │   │                 │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────────────────────────────┐     │
//! │  │   Category      │   │                Item                     │     │
//! │  │  ─────────────  │   │  ───────────────────────────────────    │     │
//! │  │  short string   │   │  { msg_id, category, body, ctime }      │     │
//! │  │  tag            │   │  created by a StateUpdate creation,     │     │
//! │  │                 │   │  removed by a dismissal, never mutated  │     │
//! │  └─────────────────┘   └─────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All identifiers are opaque byte strings. They travel in fixed hex form
//! on the wire; payload bodies travel base64-encoded. The core never
//! interprets a body.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

// =============================================================================
// Uid
// =============================================================================

/// Opaque byte string identifying the user a session belongs to.
///
/// Convertible to and from its fixed-size hex form; the hex form is also
/// the wire and storage-key representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(Vec<u8>);

impl Uid {
    /// Builds a UID from raw bytes. Empty input is rejected.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, CoreError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(CoreError::InvalidId("empty uid".into()));
        }
        Ok(Uid(bytes))
    }

    /// Parses a UID from its hex form.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes =
            hex::decode(s).map_err(|e| CoreError::InvalidId(format!("uid hex: {}", e)))?;
        Uid::from_bytes(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the fixed hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Uid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uid::from_hex(&s).map_err(D::Error::custom)
    }
}

// =============================================================================
// DeviceId
// =============================================================================

/// Opaque byte string identifying this device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(Vec<u8>);

impl DeviceId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, CoreError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(CoreError::InvalidId("empty device id".into()));
        }
        Ok(DeviceId(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes =
            hex::decode(s).map_err(|e| CoreError::InvalidId(format!("device id hex: {}", e)))?;
        DeviceId::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DeviceId::from_hex(&s).map_err(D::Error::custom)
    }
}

// =============================================================================
// MsgId
// =============================================================================

/// Opaque byte string uniquely identifying a single message for one user.
///
/// Freshly injected messages draw 16 random bytes (see
/// [`crate::factory::ItemFactory::generate_msg_id`]). Ties in item
/// ordering are broken by byte-lexicographic comparison of message IDs,
/// which the derived `Ord` on the inner `Vec<u8>` provides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgId(Vec<u8>);

impl MsgId {
    /// Builds a message ID from raw bytes. Empty input is rejected.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, CoreError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(CoreError::InvalidId("empty msg id".into()));
        }
        Ok(MsgId(bytes))
    }

    /// Parses a message ID from its hex form.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes =
            hex::decode(s).map_err(|e| CoreError::InvalidId(format!("msg id hex: {}", e)))?;
        MsgId::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for MsgId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MsgId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MsgId::from_hex(&s).map_err(D::Error::custom)
    }
}

// =============================================================================
// Category
// =============================================================================

/// Short string tag classifying an item (e.g. `show_tracker_popup`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category(String);

impl Category {
    pub fn new(s: impl Into<String>) -> Self {
        Category(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Category(s.to_string())
    }
}

// =============================================================================
// Body
// =============================================================================

/// Opaque byte payload. The core never interprets it; handlers decode it
/// however their category demands. Base64 on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body(Vec<u8>);

impl Body {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Body(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body(bytes)
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Body(bytes.to_vec())
    }
}

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Body {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(s.as_bytes()).map_err(D::Error::custom)?;
        Ok(Body(bytes))
    }
}

// =============================================================================
// Item
// =============================================================================

/// The unit of state: one live notification item.
///
/// Created by a `StateUpdate` creation, optionally removed by a dismissal
/// referencing its message ID, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier of the message that created this item.
    pub msg_id: MsgId,

    /// Classification tag; handlers match on it.
    pub category: Category,

    /// Opaque payload.
    pub body: Body,

    /// Server-assigned creation timestamp, monotonic per user.
    pub ctime: DateTime<Utc>,
}

impl Item {
    /// Sort key: total order by creation time, ties broken by message ID
    /// bytes.
    pub fn sort_key(&self) -> (DateTime<Utc>, MsgId) {
        (self.ctime, self.msg_id.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_hex_round_trip() {
        let uid = Uid::from_bytes(vec![0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(uid.to_hex(), "deadbeef");
        assert_eq!(Uid::from_hex("deadbeef").unwrap(), uid);
    }

    #[test]
    fn test_empty_ids_rejected() {
        assert!(Uid::from_bytes(Vec::new()).is_err());
        assert!(MsgId::from_bytes(Vec::new()).is_err());
        assert!(DeviceId::from_bytes(Vec::new()).is_err());
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(Uid::from_hex("not hex").is_err());
        assert!(MsgId::from_hex("zz").is_err());
    }

    #[test]
    fn test_msg_id_byte_lexicographic_order() {
        let a = MsgId::from_bytes(vec![0x01]).unwrap();
        let b = MsgId::from_bytes(vec![0x02]).unwrap();
        let c = MsgId::from_bytes(vec![0x01, 0x00]).unwrap();
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }

    #[test]
    fn test_body_base64_serde() {
        let body = Body::new(vec![0xde, 0xad]);
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, "\"3q0=\"");
        let back: Body = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn test_item_serde_round_trip() {
        let item = Item {
            msg_id: MsgId::from_bytes(vec![1, 2, 3]).unwrap(),
            category: Category::new("tracker"),
            body: Body::new(b"{\"uid\":\"u1\"}".to_vec()),
            ctime: Utc::now(),
        };
        let json = serde_json::to_string(&item).unwrap();
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}
