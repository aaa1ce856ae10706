//! # beacon-core: Domain Types and State Machine for Beacon
//!
//! This crate is the **heart** of the Beacon push client. It contains the
//! per-user state machine and the message model as pure data types with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 beacon-client (Push Client)                     │   │
//! │  │   connection manager ── sync/replay ── broadcast pipeline      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ beacon-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  message  │  │   state   │  │  factory  │  │   │
//! │  │   │ Uid MsgId │  │ InBand /  │  │  State    │  │ template  │  │   │
//! │  │   │ Item Body │  │ OutOfBand │  │  Machine  │  │ messages  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO CLOCK • PURE DATA                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                beacon-store (Local Persistence)                 │   │
//! │  │          SQLite key/value blobs, one row per user               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Identifier newtypes, payload bytes, and [`types::Item`]
//! - [`message`] - In-band and out-of-band message model
//! - [`state`] - The per-user [`state::StateMachine`]
//! - [`factory`] - Constructors for identifiers and template messages
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Server is the source of truth**: the state machine is a cache that
//!    accelerates cold start; local corruption is tolerated by deferring to
//!    the next server sync.
//! 2. **Idempotent application**: consuming an already-seen message is a
//!    reported no-op, never a corruption.
//! 3. **No I/O**: persistence and transport live in the sibling crates.

pub mod error;
pub mod factory;
pub mod message;
pub mod state;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use factory::ItemFactory;
pub use message::{
    Creation, Dismissal, DismissalRange, InBandMessage, Message, Metadata, OutOfBandMessage,
    StateSync, StateUpdate,
};
pub use state::{ConsumeResult, StateMachine, StateSnapshot};
pub use types::{Body, Category, DeviceId, Item, MsgId, Uid};

/// Number of random bytes in a freshly generated message ID.
pub const MSG_ID_LEN: usize = 16;

/// System tag of the synthetic out-of-band message broadcast after a
/// reconnect so that domain handlers can refresh their own caches.
pub const SYSTEM_RECONNECT: &str = "internal.reconnect";
