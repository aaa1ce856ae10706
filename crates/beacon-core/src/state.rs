//! # Per-User State Machine
//!
//! The in-memory authoritative view of one user's live items, updated by
//! in-band messages and queried by the push client.
//!
//! ## Consume Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     StateMachine::consume                               │
//! │                                                                         │
//! │  StateUpdate                                                           │
//! │  ───────────                                                           │
//! │  • repeated msg ID            ⇒ Err(AlreadyPresent), no state change   │
//! │  • creation                   ⇒ insert Item                            │
//! │  • dismissal (ID present)     ⇒ remove Item                            │
//! │  • dismissal (ID absent)      ⇒ silently skipped                       │
//! │  • dismissal (range)          ⇒ recorded, not applied                  │
//! │  • always                     ⇒ watermark = max(watermark, ctime)      │
//! │                                                                         │
//! │  StateSync                                                             │
//! │  ─────────                                                             │
//! │  • wholesale replacement of the item set (server-initiated only)       │
//! │                                                                         │
//! │  Ordering: items are totally ordered by ctime, ties broken by          │
//! │  byte-lexicographic msg ID.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The server is the source of truth. A persisted snapshot only has to
//! carry the *current* items and the watermark; the incremental message
//! log may be lost across restarts, in which case replay falls back to a
//! fresh state dump.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::message::{Creation, InBandMessage, Metadata, StateUpdate};
use crate::types::{Item, MsgId, Uid};

// =============================================================================
// Consume Result
// =============================================================================

/// What one `consume` call did to the state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeResult {
    /// Whether a new item was inserted.
    pub created: bool,

    /// Items removed by explicit-ID dismissal.
    pub dismissed: Vec<Item>,

    /// Range dismissals that were recorded but not applied.
    pub ranges_ignored: usize,
}

// =============================================================================
// Persistent Snapshot
// =============================================================================

/// The serialized form of a state machine: current items plus watermark.
///
/// The consumed-message log is deliberately not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub uid: Uid,
    pub items: Vec<Item>,
    pub watermark: Option<DateTime<Utc>>,
}

// =============================================================================
// State Machine
// =============================================================================

/// Live item set for one user plus sync bookkeeping.
pub struct StateMachine {
    uid: Uid,

    /// Live items keyed by the message ID that created them.
    items: HashMap<MsgId, Item>,

    /// IDs of every message applied this session, for repeat detection.
    consumed: HashSet<MsgId>,

    /// Applied messages in arrival order, for incremental replay.
    log: Vec<InBandMessage>,

    /// Creation time of the most recently consumed message.
    watermark: Option<DateTime<Utc>>,

    /// Count of range dismissals seen but not applied.
    ranges_ignored: u64,
}

impl StateMachine {
    /// Creates an empty state machine for the given user.
    pub fn new(uid: Uid) -> Self {
        StateMachine {
            uid,
            items: HashMap::new(),
            consumed: HashSet::new(),
            log: Vec::new(),
            watermark: None,
            ranges_ignored: 0,
        }
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// True if this message ID has been consumed or names a live item.
    pub fn has_message(&self, msg_id: &MsgId) -> bool {
        self.consumed.contains(msg_id) || self.items.contains_key(msg_id)
    }

    /// Looks up a live item by the message ID that created it.
    pub fn get_item(&self, msg_id: &MsgId) -> Option<&Item> {
        self.items.get(msg_id)
    }

    /// Applies an in-band message.
    ///
    /// Returns `Err(AlreadyPresent)` for a repeated message ID without
    /// changing state; otherwise advances the watermark to
    /// `max(watermark, ctime)` and reports what changed.
    pub fn consume(&mut self, msg: &InBandMessage) -> CoreResult<ConsumeResult> {
        let msg_id = msg.msg_id();
        if self.has_message(msg_id) {
            return Err(CoreError::AlreadyPresent {
                msg_id: msg_id.clone(),
            });
        }

        let result = match msg {
            InBandMessage::StateSync(sync) => {
                debug!(uid = %self.uid, items = sync.items.len(), "state sync: replacing item set");
                self.items = sync
                    .items
                    .iter()
                    .map(|item| (item.msg_id.clone(), item.clone()))
                    .collect();
                // The replaced items count as consumed so their creations
                // read as repeats if re-broadcast.
                self.consumed = self.items.keys().cloned().collect();
                self.log.clear();
                for item in &sync.items {
                    self.advance_watermark(item.ctime);
                }
                ConsumeResult::default()
            }
            InBandMessage::StateUpdate(update) => self.apply_update(update),
        };

        self.consumed.insert(msg_id.clone());
        self.log.push(msg.clone());
        self.advance_watermark(msg.ctime());
        Ok(result)
    }

    fn apply_update(&mut self, update: &StateUpdate) -> ConsumeResult {
        let mut result = ConsumeResult::default();

        if let Some(item) = update.creation_item() {
            debug!(msg_id = %item.msg_id, category = %item.category, "creating item");
            self.items.insert(item.msg_id.clone(), item);
            result.created = true;
        }

        if let Some(dismissal) = &update.dismissal {
            for id in &dismissal.msg_ids {
                match self.items.remove(id) {
                    Some(item) => {
                        debug!(msg_id = %id, "dismissing item");
                        result.dismissed.push(item);
                    }
                    None => {
                        // Absent targets are skipped, not errors.
                        debug!(msg_id = %id, "dismissal target not present, skipping");
                    }
                }
            }
            if !dismissal.ranges.is_empty() {
                debug!(
                    ranges = dismissal.ranges.len(),
                    "range dismissal not applied"
                );
                self.ranges_ignored += dismissal.ranges.len() as u64;
                result.ranges_ignored = dismissal.ranges.len();
            }
        }

        result
    }

    fn advance_watermark(&mut self, ctime: DateTime<Utc>) {
        if self.watermark.map_or(true, |w| ctime > w) {
            self.watermark = Some(ctime);
        }
    }

    /// All live items, ordered by creation time with byte-lexicographic
    /// message-ID tie-break.
    pub fn items_in_state(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.items.values().cloned().collect();
        items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Applied messages with `ctime > t`, in replay order. With `None`,
    /// every logged message qualifies.
    ///
    /// Only covers the current session's log; across a restart the log is
    /// empty and callers fall back to [`StateMachine::messages_from_state`].
    pub fn in_band_messages_since(&self, t: Option<DateTime<Utc>>) -> Vec<InBandMessage> {
        let mut msgs: Vec<InBandMessage> = self
            .log
            .iter()
            .filter(|m| t.map_or(true, |t| m.ctime() > t))
            .cloned()
            .collect();
        msgs.sort_by(|a, b| (a.ctime(), a.msg_id()).cmp(&(b.ctime(), b.msg_id())));
        msgs
    }

    /// Synthesizes one creation message per live item, in item order.
    /// This is the fresh-replay source after a full state dump.
    pub fn messages_from_state(&self) -> Vec<InBandMessage> {
        self.items_in_state()
            .into_iter()
            .map(|item| {
                InBandMessage::StateUpdate(StateUpdate {
                    md: Metadata {
                        uid: self.uid.clone(),
                        msg_id: item.msg_id.clone(),
                        device_id: None,
                        ctime: item.ctime,
                    },
                    creation: Some(Creation {
                        category: item.category,
                        body: item.body,
                    }),
                    dismissal: None,
                })
            })
            .collect()
    }

    /// Creation time of the most recently consumed message; absent before
    /// the first message.
    pub fn latest_ctime(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// How many range dismissals arrived that were not applied.
    pub fn ranges_ignored(&self) -> u64 {
        self.ranges_ignored
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Immutable copy of the current state, as handed to firehose
    /// subscribers.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            uid: self.uid.clone(),
            items: self.items_in_state(),
            watermark: self.watermark,
        }
    }

    /// Serializes the current items and watermark.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.snapshot())?)
    }

    /// Rebuilds a state machine from a persisted snapshot.
    ///
    /// The incremental log does not survive the round trip; repeat
    /// detection is re-seeded from the item IDs.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let snapshot: StateSnapshot = serde_json::from_slice(bytes)?;
        let items: HashMap<MsgId, Item> = snapshot
            .items
            .into_iter()
            .map(|item| (item.msg_id.clone(), item))
            .collect();
        let consumed = items.keys().cloned().collect();
        Ok(StateMachine {
            uid: snapshot.uid,
            items,
            consumed,
            log: Vec::new(),
            watermark: snapshot.watermark,
            ranges_ignored: 0,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Dismissal, DismissalRange, StateSync};
    use crate::types::{Body, Category};
    use chrono::TimeZone;

    fn uid() -> Uid {
        Uid::from_bytes(vec![0xaa, 0xbb]).unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn creation(msg_id: u8, cat: &str, secs: i64) -> InBandMessage {
        InBandMessage::StateUpdate(StateUpdate {
            md: Metadata {
                uid: uid(),
                msg_id: MsgId::from_bytes(vec![msg_id]).unwrap(),
                device_id: None,
                ctime: ts(secs),
            },
            creation: Some(Creation {
                category: Category::new(cat),
                body: Body::new(vec![msg_id]),
            }),
            dismissal: None,
        })
    }

    fn dismissal(msg_id: u8, target: u8, secs: i64) -> InBandMessage {
        InBandMessage::StateUpdate(StateUpdate {
            md: Metadata {
                uid: uid(),
                msg_id: MsgId::from_bytes(vec![msg_id]).unwrap(),
                device_id: None,
                ctime: ts(secs),
            },
            creation: None,
            dismissal: Some(Dismissal {
                msg_ids: vec![MsgId::from_bytes(vec![target]).unwrap()],
                ranges: Vec::new(),
            }),
        })
    }

    #[test]
    fn test_consume_creation() {
        let mut sm = StateMachine::new(uid());
        let result = sm.consume(&creation(1, "tracker", 10)).unwrap();
        assert!(result.created);
        assert_eq!(sm.item_count(), 1);
        assert_eq!(sm.latest_ctime(), Some(ts(10)));
    }

    #[test]
    fn test_repeat_is_rejected_without_state_change() {
        let mut sm = StateMachine::new(uid());
        let msg = creation(1, "tracker", 10);
        sm.consume(&msg).unwrap();

        let err = sm.consume(&msg).unwrap_err();
        assert!(err.is_repeat());
        assert_eq!(sm.item_count(), 1);
        assert_eq!(sm.latest_ctime(), Some(ts(10)));
    }

    #[test]
    fn test_items_ordered_by_ctime_then_msg_id() {
        let mut sm = StateMachine::new(uid());
        // Same ctime for 3 and 2: byte order of the msg ID breaks the tie.
        sm.consume(&creation(3, "a", 20)).unwrap();
        sm.consume(&creation(2, "b", 20)).unwrap();
        sm.consume(&creation(1, "c", 10)).unwrap();

        let ids: Vec<Vec<u8>> = sm
            .items_in_state()
            .iter()
            .map(|i| i.msg_id.as_bytes().to_vec())
            .collect();
        assert_eq!(ids, vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn test_dismissal_removes_item_and_advances_watermark() {
        let mut sm = StateMachine::new(uid());
        sm.consume(&creation(1, "tracker", 10)).unwrap();
        sm.consume(&creation(2, "tracker", 20)).unwrap();

        let result = sm.consume(&dismissal(9, 1, 30)).unwrap();
        assert_eq!(result.dismissed.len(), 1);
        assert_eq!(result.dismissed[0].msg_id.as_bytes(), &[1]);
        assert_eq!(sm.item_count(), 1);
        assert_eq!(sm.latest_ctime(), Some(ts(30)));
    }

    #[test]
    fn test_dismissal_of_absent_target_is_skipped() {
        let mut sm = StateMachine::new(uid());
        sm.consume(&creation(1, "tracker", 10)).unwrap();

        let result = sm.consume(&dismissal(9, 42, 20)).unwrap();
        assert!(result.dismissed.is_empty());
        assert_eq!(sm.item_count(), 1);
    }

    #[test]
    fn test_range_dismissals_recorded_not_applied() {
        let mut sm = StateMachine::new(uid());
        sm.consume(&creation(1, "tracker", 10)).unwrap();

        let msg = InBandMessage::StateUpdate(StateUpdate {
            md: Metadata {
                uid: uid(),
                msg_id: MsgId::from_bytes(vec![9]).unwrap(),
                device_id: None,
                ctime: ts(20),
            },
            creation: None,
            dismissal: Some(Dismissal {
                msg_ids: Vec::new(),
                ranges: vec![DismissalRange {
                    category: None,
                    end_time: ts(15),
                }],
            }),
        });
        let result = sm.consume(&msg).unwrap();
        assert_eq!(result.ranges_ignored, 1);
        assert_eq!(sm.ranges_ignored(), 1);
        // The item inside the range survives.
        assert_eq!(sm.item_count(), 1);
    }

    #[test]
    fn test_watermark_monotonic_under_out_of_order_ctimes() {
        let mut sm = StateMachine::new(uid());
        sm.consume(&creation(1, "a", 30)).unwrap();
        sm.consume(&creation(2, "b", 10)).unwrap();
        assert_eq!(sm.latest_ctime(), Some(ts(30)));
    }

    #[test]
    fn test_messages_since_watermark() {
        let mut sm = StateMachine::new(uid());
        sm.consume(&creation(1, "a", 10)).unwrap();
        sm.consume(&creation(2, "b", 20)).unwrap();
        sm.consume(&creation(3, "c", 30)).unwrap();

        let msgs = sm.in_band_messages_since(Some(ts(10)));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].msg_id().as_bytes(), &[2]);
        assert_eq!(msgs[1].msg_id().as_bytes(), &[3]);

        assert_eq!(sm.in_band_messages_since(None).len(), 3);
    }

    #[test]
    fn test_state_sync_replaces_items() {
        let mut sm = StateMachine::new(uid());
        sm.consume(&creation(1, "a", 10)).unwrap();

        let replacement = Item {
            msg_id: MsgId::from_bytes(vec![7]).unwrap(),
            category: Category::new("fresh"),
            body: Body::default(),
            ctime: ts(50),
        };
        let sync = InBandMessage::StateSync(StateSync {
            md: Metadata {
                uid: uid(),
                msg_id: MsgId::from_bytes(vec![0xff]).unwrap(),
                device_id: None,
                ctime: ts(50),
            },
            items: vec![replacement.clone()],
        });
        sm.consume(&sync).unwrap();

        assert_eq!(sm.items_in_state(), vec![replacement]);
        // A re-broadcast creation for a dumped item reads as a repeat.
        assert!(sm.has_message(&MsgId::from_bytes(vec![7]).unwrap()));
    }

    #[test]
    fn test_snapshot_round_trip_keeps_items_and_watermark() {
        let mut sm = StateMachine::new(uid());
        sm.consume(&creation(1, "a", 10)).unwrap();
        sm.consume(&creation(2, "b", 20)).unwrap();
        sm.consume(&dismissal(9, 1, 30)).unwrap();

        let bytes = sm.to_bytes().unwrap();
        let restored = StateMachine::from_bytes(&bytes).unwrap();

        assert_eq!(restored.uid(), sm.uid());
        assert_eq!(restored.items_in_state(), sm.items_in_state());
        assert_eq!(restored.latest_ctime(), Some(ts(30)));
        // The log is not persisted: incremental replay history is gone.
        assert!(restored.in_band_messages_since(None).is_empty());
        // But repeat detection survives for live items.
        assert!(restored.has_message(&MsgId::from_bytes(vec![2]).unwrap()));
    }

    #[test]
    fn test_messages_from_state_synthesizes_creations() {
        let mut sm = StateMachine::new(uid());
        sm.consume(&creation(2, "b", 20)).unwrap();
        sm.consume(&creation(1, "a", 10)).unwrap();

        let msgs = sm.messages_from_state();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].msg_id().as_bytes(), &[1]);
        let update = msgs[0].as_state_update().unwrap();
        assert_eq!(
            update.creation.as_ref().unwrap().category.as_str(),
            "a"
        );
    }
}
