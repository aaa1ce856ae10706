//! # beacon-client: The Beacon Push Client
//!
//! A long-lived client that maintains a persistent, authenticated,
//! ordered session with a remote notification broker, replicates the
//! broker's per-user state into a local state machine, and dispatches
//! state changes and out-of-band events to in-process subscribers.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Push Client Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     PushClient (Orchestrator)                    │  │
//! │  │                                                                  │  │
//! │  │  • authenticates and syncs on every (re)connect                  │  │
//! │  │  • funnels inbound broadcasts through the state machine          │  │
//! │  │  • dispatches create/dismiss events to in-band handlers          │  │
//! │  │  • pushes state snapshots to firehose subscribers                │  │
//! │  │  • publishes writes (inject/dismiss) back to the broker          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ ConnectionEvents                        │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │                     ConnectionManager                            │  │
//! │  │                                                                  │  │
//! │  │  dial TLS/plain │ constant reconnect │ ping loop │ shutdown      │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ WebSocket (JSON envelope)               │
//! │                               ▼                                         │
//! │                            Broker                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`client`] - `PushClient` orchestrator and builder
//! - [`transport`] - Connection manager, reconnect and ping loops
//! - [`rpc`] - Request/response correlation and the timeout wrapper
//! - [`protocol`] - Wire envelope and payloads
//! - [`handlers`] - Subscriber traits and the pruning registry
//! - [`session`] - Session provider trait
//! - [`badge`] - Per-category unread totals for UI sinks
//! - [`config`] - Timeouts, intervals, bundled CAs
//! - [`clock`] - Injected time source
//! - [`error`] - Client error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_client::{ClientConfig, PushClient, StaticSession};
//! use beacon_store::{SqliteStore, StoreConfig};
//!
//! let store = Arc::new(SqliteStore::new(StoreConfig::new("./beacon.db")).await?);
//! let session = Arc::new(StaticSession::new(token, uid));
//! let client = PushClient::new(ClientConfig::from_env(), store, session);
//!
//! client.push_handler(my_handler).await;
//! client.connect("wss://push.example.com/stream").await?;
//! ```

pub mod badge;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod transport;

pub use badge::{BadgeSink, BadgeState, NoOpBadgeSink};
pub use client::{PushClient, PushClientBuilder, PushStateFilter};
pub use clock::{Clock, SystemClock};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use handlers::{
    FirehoseHandler, HandlerRegistry, InBandHandler, PushReason, SystemHandler,
};
pub use protocol::{WireKind, WireMessage};
pub use rpc::{RpcClient, TimeoutRpc};
pub use session::{Session, SessionProvider, StaticSession};
pub use transport::{ConnState, ConnectionEvents, ConnectionManager};
