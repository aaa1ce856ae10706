//! # Item Factory
//!
//! Constructors for identifiers and template messages. The write path
//! builds its outbound creations and dismissals here so that every
//! injected message carries a fresh random ID and the local user's UID.

use rand::RngCore;

use crate::error::CoreResult;
use crate::message::{Creation, Dismissal, InBandMessage, Message, Metadata, StateUpdate};
use crate::types::{Body, Category, DeviceId, MsgId, Uid};
use crate::MSG_ID_LEN;

/// Builds UIDs, device IDs, message IDs and template messages from raw
/// bytes.
#[derive(Debug, Clone, Default)]
pub struct ItemFactory;

impl ItemFactory {
    pub fn new() -> Self {
        ItemFactory
    }

    /// Builds a UID from raw bytes.
    pub fn make_uid(&self, bytes: &[u8]) -> CoreResult<Uid> {
        Uid::from_bytes(bytes.to_vec())
    }

    /// Builds a device ID from raw bytes.
    pub fn make_device_id(&self, bytes: &[u8]) -> CoreResult<DeviceId> {
        DeviceId::from_bytes(bytes.to_vec())
    }

    /// Builds a message ID from raw bytes.
    pub fn make_msg_id(&self, bytes: &[u8]) -> CoreResult<MsgId> {
        MsgId::from_bytes(bytes.to_vec())
    }

    /// Draws a fresh random message ID (16 bytes).
    pub fn generate_msg_id(&self) -> MsgId {
        let mut bytes = [0u8; MSG_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        MsgId::from_bytes(bytes.to_vec()).expect("random msg id is non-empty")
    }

    /// Bare state-update template: fresh message ID, the given UID, no
    /// creation or dismissal yet. The broker stamps the creation time on
    /// echo.
    fn template_update(&self, uid: &Uid) -> StateUpdate {
        StateUpdate {
            md: Metadata {
                uid: uid.clone(),
                msg_id: self.generate_msg_id(),
                device_id: None,
                ctime: chrono::DateTime::UNIX_EPOCH,
            },
            creation: None,
            dismissal: None,
        }
    }

    /// Empty template message, ready for a creation or dismissal.
    pub fn template_message(&self, uid: &Uid) -> Message {
        Message::in_band(InBandMessage::StateUpdate(self.template_update(uid)))
    }

    /// Template carrying a single creation. Returns the message together
    /// with the ID assigned to it.
    pub fn creation_message(&self, uid: &Uid, category: Category, body: Body) -> (Message, MsgId) {
        let mut update = self.template_update(uid);
        update.creation = Some(Creation { category, body });
        let msg_id = update.md.msg_id.clone();
        (
            Message::in_band(InBandMessage::StateUpdate(update)),
            msg_id,
        )
    }

    /// Template carrying a dismissal of one message ID.
    pub fn dismissal_message(&self, uid: &Uid, dismiss: MsgId) -> Message {
        let mut update = self.template_update(uid);
        update.dismissal = Some(Dismissal {
            msg_ids: vec![dismiss],
            ranges: Vec::new(),
        });
        Message::in_band(InBandMessage::StateUpdate(update))
    }

    /// Out-of-band message addressed from the given user.
    pub fn out_of_band_message(&self, uid: &Uid, system: &str, body: Body) -> Message {
        Message::out_of_band(crate::message::OutOfBandMessage {
            uid: uid.clone(),
            system: system.to_string(),
            body,
        })
    }
}
