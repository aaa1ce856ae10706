//! # Subscriber Handlers
//!
//! The two subscriber kinds and the registry that holds them.
//!
//! ## Subscriber Kinds
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Subscriber Kinds                                │
//! │                                                                         │
//! │  IN-BAND HANDLER                                                       │
//! │  ───────────────                                                       │
//! │  • receives individual create/dismiss events with their category       │
//! │  • replayed against current state when registered while connected      │
//! │                                                                         │
//! │  FIREHOSE HANDLER                                                      │
//! │  ────────────────                                                      │
//! │  • receives whole-state snapshots after each change                    │
//! │  • receives out-of-band messages verbatim                              │
//! │                                                                         │
//! │  SYSTEM HANDLER                                                        │
//! │  ──────────────                                                        │
//! │  • owns one out-of-band system tag (e.g. "chat.activity")              │
//! │                                                                         │
//! │  Removal is lazy: after each dispatch pass the registry drops every    │
//! │  entry whose `is_alive()` went false. There is no unregister.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handler callbacks run synchronously and serially under the client
//! lock; their contract forbids blocking RPC, though a slow handler only
//! delays the current broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use beacon_core::{Category, Item, OutOfBandMessage, StateSnapshot};

use crate::error::ClientResult;

// =============================================================================
// Push Reasons
// =============================================================================

/// Why a state snapshot is being pushed to firehose subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushReason {
    /// A fresh broadcast changed the state.
    NewData,

    /// The client just (re)connected and synced.
    Reconnected,
}

// =============================================================================
// Handler Traits
// =============================================================================

/// Consumer of individual create/dismiss events, matched by category.
///
/// `create` and `dismiss` return `(handled, result)`: a handler that does
/// not own the category answers `(false, Ok(()))` and is passed over
/// silently; a failure with `handled = true` is logged as a warning,
/// with `handled = false` as debug. Errors never abort dispatch to the
/// remaining handlers.
#[async_trait]
pub trait InBandHandler: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    /// Liveness check; a false answer removes the handler on the next
    /// dispatch pass.
    fn is_alive(&self) -> bool;

    async fn create(&self, category: &Category, item: &Item) -> (bool, ClientResult<()>);

    async fn dismiss(&self, category: &Category, item: &Item) -> (bool, ClientResult<()>);
}

/// Consumer of whole-state snapshots and out-of-band messages.
#[async_trait]
pub trait FirehoseHandler: Send + Sync {
    fn is_alive(&self) -> bool;

    async fn push_state(&self, state: StateSnapshot, reason: PushReason);

    async fn push_out_of_band(&self, messages: Vec<OutOfBandMessage>);
}

/// Owner of one out-of-band system tag. The original hardcoded these
/// routes; hosts register theirs explicitly.
#[async_trait]
pub trait SystemHandler: Send + Sync {
    async fn handle(&self, message: &OutOfBandMessage) -> ClientResult<()>;
}

// =============================================================================
// Registry
// =============================================================================

/// The subscriber lists. Mutated only under the push-client lock.
#[derive(Default)]
pub struct HandlerRegistry {
    in_band: Vec<Arc<dyn InBandHandler>>,
    firehose: Vec<Arc<dyn FirehoseHandler>>,
    systems: HashMap<String, Arc<dyn SystemHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    pub fn push_in_band(&mut self, handler: Arc<dyn InBandHandler>) {
        debug!(
            name = handler.name(),
            position = self.in_band.len(),
            "registering in-band handler"
        );
        self.in_band.push(handler);
    }

    pub fn push_firehose(&mut self, handler: Arc<dyn FirehoseHandler>) {
        self.firehose.push(handler);
    }

    pub fn register_system(&mut self, system: impl Into<String>, handler: Arc<dyn SystemHandler>) {
        self.systems.insert(system.into(), handler);
    }

    /// Live in-band handlers, in registration order.
    pub fn in_band(&self) -> Vec<Arc<dyn InBandHandler>> {
        self.in_band.iter().filter(|h| h.is_alive()).cloned().collect()
    }

    /// Live firehose handlers, in registration order.
    pub fn firehose(&self) -> Vec<Arc<dyn FirehoseHandler>> {
        self.firehose.iter().filter(|h| h.is_alive()).cloned().collect()
    }

    pub fn system(&self, tag: &str) -> Option<Arc<dyn SystemHandler>> {
        self.systems.get(tag).cloned()
    }

    /// Drops entries whose `is_alive()` went false. Called after each
    /// dispatch pass; this is the only removal path.
    pub fn prune(&mut self) {
        let before = self.in_band.len() + self.firehose.len();
        self.in_band.retain(|h| {
            let alive = h.is_alive();
            if !alive {
                debug!(name = h.name(), "dropping dead in-band handler");
            }
            alive
        });
        self.firehose.retain(|h| h.is_alive());
        let after = self.in_band.len() + self.firehose.len();
        if before != after {
            debug!(before, after, "pruned dead handlers");
        }
    }

    pub fn in_band_len(&self) -> usize {
        self.in_band.len()
    }

    pub fn firehose_len(&self) -> usize {
        self.firehose.len()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
