//! # Badge Totals
//!
//! Lightweight unread-totals summary pushed to UI sinks alongside full
//! snapshots, so a frontend can render counters without decoding item
//! bodies. Recomputed from every state push and resynced in the
//! background after reconnect.

use std::collections::HashMap;

use async_trait::async_trait;

use beacon_core::StateSnapshot;

/// Per-category unread totals derived from a state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadgeState {
    /// Total live items.
    pub total: usize,

    /// Live items per category.
    pub by_category: HashMap<String, usize>,
}

impl BadgeState {
    /// Counts the items in a snapshot.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        let mut by_category: HashMap<String, usize> = HashMap::new();
        for item in &snapshot.items {
            *by_category.entry(item.category.as_str().to_string()).or_insert(0) += 1;
        }
        BadgeState {
            total: snapshot.items.len(),
            by_category,
        }
    }
}

/// Receiver of badge updates (typically a UI bridge). Failures are the
/// sink's own problem; the client never retries a badge push.
#[async_trait]
pub trait BadgeSink: Send + Sync {
    async fn push_badge(&self, badge: BadgeState);
}

/// Sink that drops every update, for hosts without a UI.
#[derive(Debug, Clone, Default)]
pub struct NoOpBadgeSink;

#[async_trait]
impl BadgeSink for NoOpBadgeSink {
    async fn push_badge(&self, _badge: BadgeState) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{Body, Category, Item, MsgId, Uid};
    use chrono::Utc;

    #[test]
    fn test_badge_counts_by_category() {
        let item = |id: u8, cat: &str| Item {
            msg_id: MsgId::from_bytes(vec![id]).unwrap(),
            category: Category::new(cat),
            body: Body::default(),
            ctime: Utc::now(),
        };
        let snapshot = StateSnapshot {
            uid: Uid::from_bytes(vec![1]).unwrap(),
            items: vec![item(1, "a"), item(2, "a"), item(3, "b")],
            watermark: None,
        };

        let badge = BadgeState::from_snapshot(&snapshot);
        assert_eq!(badge.total, 3);
        assert_eq!(badge.by_category.get("a"), Some(&2));
        assert_eq!(badge.by_category.get("b"), Some(&1));
    }
}
