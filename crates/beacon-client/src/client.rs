//! # Push Client
//!
//! Orchestrates the whole lifecycle: authentication and sync/replay on
//! connect, the inbound broadcast funnel, the inject/dismiss write path,
//! and snapshot publication to firehose subscribers.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         PushClient Data Flow                            │
//! │                                                                         │
//! │  Broker ──► ConnectionManager ──► broadcast()                          │
//! │                                      │                                  │
//! │                       ┌──────────────┼──────────────────┐              │
//! │                       ▼              ▼                  ▼              │
//! │                 in-band handler  StateMachine      firehose            │
//! │                 dispatch         consume           snapshot push       │
//! │                                                                         │
//! │  WRITE PATH                                                            │
//! │  ──────────                                                            │
//! │  inject/dismiss ──► template message ──► Consume RPC ──► Broker        │
//! │  (local state is only updated by the echo through broadcast)           │
//! │                                                                         │
//! │  LOCKING                                                               │
//! │  ───────                                                               │
//! │  One client lock guards handlers, state machine, RPC handle and        │
//! │  fresh_replay. It is held for the whole of broadcast(), handler        │
//! │  registration and the on_connect body, and is always taken before      │
//! │  the connection lock.                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, warn};
use url::Url;

use beacon_core::{
    Body, Category, InBandMessage, Item, ItemFactory, Message, MsgId, StateMachine,
    StateSnapshot, StateUpdate, Uid, SYSTEM_RECONNECT,
};
use beacon_store::LocalStore;

use crate::badge::{BadgeSink, BadgeState, NoOpBadgeSink};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::handlers::{
    FirehoseHandler, HandlerRegistry, InBandHandler, PushReason, SystemHandler,
};
use crate::rpc::{RpcClient, TimeoutRpc};
use crate::session::SessionProvider;
use crate::transport::{ConnectionEvents, ConnectionManager};

/// Predicate deciding whether a consumed broadcast triggers a state push
/// to firehose subscribers.
pub type PushStateFilter = Box<dyn Fn(&Message) -> bool + Send + Sync>;

// =============================================================================
// Client State (under the client lock)
// =============================================================================

struct Locked {
    registry: HandlerRegistry,
    state: Option<StateMachine>,
    uid: Option<Uid>,
    rpc: Option<TimeoutRpc>,
    session_id: Option<String>,
    fresh_replay: bool,
    push_state_filter: Option<PushStateFilter>,
    last_save: Option<chrono::DateTime<chrono::Utc>>,
}

// =============================================================================
// Push Client
// =============================================================================

/// The push-notification client. Cheap to clone; all clones share one
/// session.
#[derive(Clone)]
pub struct PushClient {
    inner: Arc<PushInner>,
}

struct PushInner {
    config: Arc<ClientConfig>,
    store: Arc<dyn LocalStore>,
    session: Arc<dyn SessionProvider>,
    clock: Arc<dyn Clock>,
    badge_sink: Arc<dyn BadgeSink>,
    factory: ItemFactory,

    /// The client lock. See the module docs for what it guards.
    locked: AsyncMutex<Locked>,

    /// The connection lock: guards the manager handle only. Never held
    /// across an RPC, always taken after the client lock.
    conn: std::sync::Mutex<Option<ConnectionManager>>,

    /// One-shot reconnect suppression, consumed by
    /// `should_retry_on_connect`.
    skip_retry_connect: AtomicBool,

    shut: AtomicBool,

    /// Times an errored first sync skipped the full dump that a fresh
    /// replay would have fetched.
    fresh_replay_skipped: AtomicU64,

    self_weak: Weak<PushInner>,
}

impl PushClient {
    /// Creates a client with the default clock and no badge sink.
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn LocalStore>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        PushClientBuilder::new(config)
            .with_store(store)
            .with_session(session)
            .build()
            .expect("store and session are set")
    }

    fn from_parts(
        config: ClientConfig,
        store: Arc<dyn LocalStore>,
        session: Arc<dyn SessionProvider>,
        clock: Arc<dyn Clock>,
        badge_sink: Arc<dyn BadgeSink>,
    ) -> Self {
        let inner = Arc::new_cyclic(|self_weak| PushInner {
            config: Arc::new(config),
            store,
            session,
            clock,
            badge_sink,
            factory: ItemFactory::new(),
            locked: AsyncMutex::new(Locked {
                registry: HandlerRegistry::new(),
                state: None,
                uid: None,
                rpc: None,
                session_id: None,
                fresh_replay: true,
                push_state_filter: None,
                last_save: None,
            }),
            conn: std::sync::Mutex::new(None),
            skip_retry_connect: AtomicBool::new(false),
            shut: AtomicBool::new(false),
            fresh_replay_skipped: AtomicU64::new(0),
            self_weak: self_weak.clone(),
        });
        PushClient { inner }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the connection lifecycle against the given broker URI
    /// (`ws://host:port/...` or `wss://host/...`). Re-initializes the
    /// state machine from the session provider and the local store first.
    pub async fn connect(&self, uri: &str) -> ClientResult<()> {
        let uri = Url::parse(uri)?;
        self.inner.shut.store(false, Ordering::SeqCst);
        self.inner.reset_state_machine().await?;

        let events: Weak<dyn ConnectionEvents> = self.inner.self_weak.clone();
        let manager = ConnectionManager::new(
            self.inner.config.clone(),
            self.inner.clock.clone(),
            events,
        );

        let mut conn = self.inner.conn.lock().expect("connection lock poisoned");
        if let Some(old) = conn.take() {
            old.shutdown();
        }
        manager.connect(uri);
        *conn = Some(manager);
        Ok(())
    }

    /// Tears the connection down. Idempotent; no handler callbacks fire
    /// and no RPCs are issued afterwards.
    pub fn shutdown(&self) {
        debug!("push client shutdown");
        self.inner.shut.store(true, Ordering::SeqCst);
        let conn = self.inner.conn.lock().expect("connection lock poisoned");
        if let Some(manager) = conn.as_ref() {
            manager.shutdown();
        }
    }

    /// Shutdown plus state-machine re-init from the local store.
    pub async fn reset(&self) -> ClientResult<()> {
        self.shutdown();
        self.inner.reset_state_machine().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    // =========================================================================
    // Handler Registration
    // =========================================================================

    /// Registers an in-band handler. If already connected, the current
    /// state is immediately replayed against the new handler only.
    pub async fn push_handler(&self, handler: Arc<dyn InBandHandler>) {
        let mut locked = self.inner.locked.lock().await;
        locked.registry.push_in_band(handler.clone());

        if self.inner.is_connected() {
            if let Some(state) = locked.state.as_ref() {
                for msg in state.messages_from_state() {
                    if let Some(update) = msg.as_state_update() {
                        PushInner::dispatch_to_handler(
                            state,
                            &HashMap::new(),
                            update,
                            handler.as_ref(),
                        )
                        .await;
                    }
                }
                let badge = BadgeState::from_snapshot(&state.snapshot());
                self.inner.badge_sink.push_badge(badge).await;
            }
        }
    }

    /// Registers a firehose handler and immediately pushes it the current
    /// state.
    pub async fn push_firehose_handler(&self, handler: Arc<dyn FirehoseHandler>) {
        let mut locked = self.inner.locked.lock().await;
        locked.registry.push_firehose(handler.clone());

        if let Some(state) = locked.state.as_ref() {
            handler
                .push_state(state.snapshot(), PushReason::Reconnected)
                .await;
        } else {
            warn!("cannot push state to new firehose handler: no state machine");
        }
    }

    /// Registers the owner of one out-of-band system tag.
    pub async fn register_system_handler(&self, system: &str, handler: Arc<dyn SystemHandler>) {
        let mut locked = self.inner.locked.lock().await;
        locked.registry.register_system(system, handler);
    }

    /// Installs the predicate deciding which consumed broadcasts push a
    /// state snapshot to firehose subscribers. Default: all of them.
    pub async fn set_push_state_filter(&self, filter: PushStateFilter) {
        let mut locked = self.inner.locked.lock().await;
        locked.push_state_filter = Some(filter);
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Publishes a new item and returns its message ID. Local state is
    /// not touched; the broker's echo updates it through the broadcast
    /// pipeline.
    pub async fn inject_item(&self, category: &str, body: &[u8]) -> ClientResult<MsgId> {
        let (rpc, uid) = self.inner.write_handles().await?;
        let (message, msg_id) =
            self.inner
                .factory
                .creation_message(&uid, Category::new(category), Body::from(body));
        debug!(%msg_id, category, "injecting item");
        rpc.consume_message(message).await?;
        Ok(msg_id)
    }

    /// Publishes a dismissal of the given item.
    pub async fn dismiss_item(&self, msg_id: &MsgId) -> ClientResult<()> {
        let (rpc, uid) = self.inner.write_handles().await?;
        debug!(%msg_id, "dismissing item");
        let message = self.inner.factory.dismissal_message(&uid, msg_id.clone());
        rpc.consume_message(message).await
    }

    /// Publishes an out-of-band message.
    pub async fn inject_out_of_band(&self, system: &str, body: &[u8]) -> ClientResult<()> {
        let (rpc, uid) = self.inner.write_handles().await?;
        debug!(system, "injecting out-of-band message");
        let message = self
            .inner
            .factory
            .out_of_band_message(&uid, system, Body::from(body));
        rpc.consume_message(message).await
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Server-assigned session ID of the current (or last) connection.
    pub async fn session_id(&self) -> Option<String> {
        let locked = self.inner.locked.lock().await;
        locked.session_id.clone()
    }

    /// Immutable copy of the current state.
    pub async fn get_state(&self) -> ClientResult<StateSnapshot> {
        let locked = self.inner.locked.lock().await;
        locked
            .state
            .as_ref()
            .map(StateMachine::snapshot)
            .ok_or(ClientError::NotLoggedIn)
    }

    /// Times an errored first sync skipped the fresh full dump.
    pub fn fresh_replay_skipped(&self) -> u64 {
        self.inner.fresh_replay_skipped.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Inner: shared plumbing
// =============================================================================

impl PushInner {
    fn is_connected(&self) -> bool {
        let conn = self.conn.lock().expect("connection lock poisoned");
        conn.as_ref().map(ConnectionManager::is_connected).unwrap_or(false)
    }

    /// Builds (or restores) the state machine for the current session.
    /// Restore failures are non-fatal: the machine starts empty and the
    /// next server sync fills it.
    async fn reset_state_machine(&self) -> ClientResult<()> {
        let session = self.session.current().await.map_err(|err| {
            warn!(%err, "unable to create push client state");
            err
        })?;

        let machine = match self.store.get(&session.uid).await {
            Ok(Some(bytes)) => match StateMachine::from_bytes(&bytes) {
                Ok(machine) if machine.uid() == &session.uid => {
                    debug!(items = machine.item_count(), "restored state from local store");
                    machine
                }
                Ok(_) => {
                    warn!("stored state belongs to another user, starting empty");
                    StateMachine::new(session.uid.clone())
                }
                Err(err) => {
                    warn!(%err, "restore local state failed, starting empty");
                    StateMachine::new(session.uid.clone())
                }
            },
            Ok(None) => StateMachine::new(session.uid.clone()),
            Err(err) => {
                warn!(%err, "local store unavailable, starting empty");
                StateMachine::new(session.uid.clone())
            }
        };

        let mut locked = self.locked.lock().await;
        locked.state = Some(machine);
        locked.uid = Some(session.uid);
        Ok(())
    }

    /// RPC handle and UID for the write path, without holding the client
    /// lock across the call.
    async fn write_handles(&self) -> ClientResult<(TimeoutRpc, Uid)> {
        let locked = self.locked.lock().await;
        let rpc = locked.rpc.clone().ok_or(ClientError::Disconnected)?;
        let uid = locked.uid.clone().ok_or(ClientError::NotLoggedIn)?;
        Ok((rpc, uid))
    }

    // =========================================================================
    // Sync & Replay
    // =========================================================================

    /// Syncs down everything missed while dead, replays it against the
    /// live handlers, and publishes a `Reconnected` snapshot.
    ///
    /// The fresh flag is cleared no matter how the sync went; when the
    /// first sync errors, the skipped full dump is recorded in a counter
    /// rather than retried.
    async fn server_sync(&self, locked: &mut Locked, rpc: &TimeoutRpc) -> ClientResult<()> {
        let was_fresh = locked.fresh_replay;
        let result = self.server_sync_inner(locked, rpc, was_fresh).await;
        if locked.fresh_replay {
            locked.fresh_replay = false;
            if was_fresh && result.is_err() {
                self.fresh_replay_skipped.fetch_add(1, Ordering::SeqCst);
                warn!("first sync failed; the full state dump will not be retried");
            }
        }
        result
    }

    async fn server_sync_inner(
        &self,
        locked: &mut Locked,
        rpc: &TimeoutRpc,
        fresh: bool,
    ) -> ClientResult<()> {
        let since = {
            let state = locked.state.as_ref().ok_or(ClientError::NotLoggedIn)?;
            if fresh {
                debug!("performing a fresh replay");
                None
            } else {
                let since = state.latest_ctime();
                debug!(?since, "starting incremental replay");
                since
            }
        };

        let messages = rpc.sync(since).await?;

        let Locked { registry, state, .. } = &mut *locked;
        let state = state.as_mut().ok_or(ClientError::NotLoggedIn)?;

        // Items removed while merging this batch, kept so replayed
        // dismissals can still hand the pre-consumption item to handlers.
        let mut dismissed: HashMap<MsgId, Item> = HashMap::new();
        let mut consumed = 0usize;
        for message in &messages {
            let Some(ibm) = &message.ibm else { continue };
            match state.consume(ibm) {
                Ok(result) => {
                    consumed += 1;
                    for item in result.dismissed {
                        dismissed.insert(item.msg_id.clone(), item);
                    }
                }
                Err(err) if err.is_repeat() => {
                    debug!(msg_id = %ibm.msg_id(), "sync message already in state")
                }
                Err(err) => warn!(%err, "failed to consume sync message"),
            }
        }

        let replay = if fresh {
            state.messages_from_state()
        } else {
            state.in_band_messages_since(since)
        };
        debug!(replayed = replay.len(), consumed, "sync success");

        // A failure while replaying one message never aborts the rest;
        // this is the only way to make progress past partial corruption.
        for message in &replay {
            Self::dispatch_in_band(registry, state, &dismissed, message).await;
        }
        registry.prune();

        self.push_state_locked(locked, PushReason::Reconnected).await;
        Ok(())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Runs an in-band message against every live handler. State syncs
    /// are not dispatched. Dismissal targets are resolved against the
    /// pre-consumption state; `dismissed` carries items that a sync merge
    /// already removed, so replayed dismissals still see them.
    async fn dispatch_in_band(
        registry: &HandlerRegistry,
        state: &StateMachine,
        dismissed: &HashMap<MsgId, Item>,
        ibm: &InBandMessage,
    ) {
        let Some(update) = ibm.as_state_update() else {
            debug!("state sync message, not dispatched");
            return;
        };
        for handler in registry.in_band() {
            Self::dispatch_to_handler(state, dismissed, update, handler.as_ref()).await;
        }
    }

    async fn dispatch_to_handler(
        state: &StateMachine,
        dismissed: &HashMap<MsgId, Item>,
        update: &StateUpdate,
        handler: &dyn InBandHandler,
    ) {
        if let Some(item) = update.creation_item() {
            debug!(
                msg_id = %item.msg_id,
                category = %item.category,
                handler = handler.name(),
                "dispatching creation"
            );
            let (handled, result) = handler.create(&item.category, &item).await;
            if let Err(err) = result {
                if handled {
                    error!(handler = handler.name(), %err, "handler failed");
                } else {
                    debug!(handler = handler.name(), %err, "handler declined with error");
                }
            }
        }

        if let Some(dismissal) = &update.dismissal {
            for msg_id in &dismissal.msg_ids {
                let Some(item) = state.get_item(msg_id).or_else(|| dismissed.get(msg_id)) else {
                    debug!(%msg_id, "dismissal target not present, skipping");
                    continue;
                };
                let (handled, result) = handler.dismiss(&item.category, item).await;
                if let Err(err) = result {
                    if handled {
                        error!(handler = handler.name(), %err, "dismiss handler failed");
                    } else {
                        debug!(handler = handler.name(), %err, "dismiss handler declined");
                    }
                }
            }
            if !dismissal.ranges.is_empty() {
                debug!("message range dismissing not implemented");
            }
        }
    }

    // =========================================================================
    // Snapshot & Badge Push
    // =========================================================================

    async fn push_state_locked(&self, locked: &mut Locked, reason: PushReason) {
        let Some(state) = locked.state.as_ref() else {
            warn!("cannot push state: no state machine");
            return;
        };
        let snapshot = state.snapshot();
        for handler in locked.registry.firehose() {
            handler.push_state(snapshot.clone(), reason).await;
        }
        locked.registry.prune();
        self.badge_sink
            .push_badge(BadgeState::from_snapshot(&snapshot))
            .await;
    }

    /// Persists the state machine if the save interval has elapsed.
    async fn maybe_save(&self, locked: &mut Locked) {
        let now = self.clock.now();
        let due = locked.last_save.map_or(true, |t| {
            (now - t).to_std().unwrap_or_default() >= self.config.save_interval
        });
        if !due {
            return;
        }
        let Some(state) = locked.state.as_ref() else {
            return;
        };
        match state.to_bytes() {
            Ok(bytes) => {
                if let Err(err) = self.store.put(state.uid(), &bytes).await {
                    warn!(%err, "failed to save state, proceeding in memory");
                }
            }
            Err(err) => warn!(%err, "failed to serialize state"),
        }
        locked.last_save = Some(now);
    }

    // =========================================================================
    // Background Tasks
    // =========================================================================

    /// Re-derives badge totals off the connect path. Detached: allowed to
    /// outlive shutdown.
    fn spawn_badge_resync(&self) {
        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else { return };
            let badge = {
                let locked = inner.locked.lock().await;
                locked
                    .state
                    .as_ref()
                    .map(|state| BadgeState::from_snapshot(&state.snapshot()))
            };
            if let Some(badge) = badge {
                inner.badge_sink.push_badge(badge).await;
            }
        });
    }

    /// Broadcasts the synthetic reconnect message so domain handlers can
    /// refresh their own caches. Spawned so reconnection is not delayed.
    fn spawn_reconnect_broadcast(&self, uid: Uid) {
        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else { return };
            let message = inner
                .factory
                .out_of_band_message(&uid, SYSTEM_RECONNECT, Body::default());
            if let Err(err) = inner.broadcast(message).await {
                debug!(%err, "reconnect broadcast failed");
            }
        });
    }

    // =========================================================================
    // Broadcast Funnel
    // =========================================================================

    async fn broadcast_locked(&self, locked: &mut Locked, message: Message) -> ClientResult<()> {
        if let Some(ibm) = &message.ibm {
            let msg_id = ibm.msg_id().clone();
            {
                let state = locked.state.as_ref().ok_or(ClientError::NotLoggedIn)?;
                if state.has_message(&msg_id) {
                    debug!(%msg_id, "msg already in state, ignoring");
                    return Err(ClientError::Repeat { msg_id });
                }
            }
            debug!(%msg_id, ctime = %ibm.ctime(), "broadcast: in-band message");

            {
                let Locked { registry, state, .. } = &mut *locked;
                let state = state.as_ref().ok_or(ClientError::NotLoggedIn)?;
                // Live dispatch runs before consume, so targets are still
                // in state and no carried-over dismissals are needed.
                Self::dispatch_in_band(registry, state, &HashMap::new(), ibm).await;
                registry.prune();
            }

            {
                let state = locked.state.as_mut().ok_or(ClientError::NotLoggedIn)?;
                if let Err(err) = state.consume(ibm) {
                    warn!(%err, "state machine rejected broadcast");
                }
            }

            let wants_push = locked
                .push_state_filter
                .as_ref()
                .map(|f| f(&message))
                .unwrap_or(true);
            if wants_push {
                self.push_state_locked(locked, PushReason::NewData).await;
            }
            self.maybe_save(locked).await;
            return Ok(());
        }

        if let Some(oobm) = &message.oobm {
            debug!(uid = %oobm.uid, system = %oobm.system, "broadcast: out-of-band message");

            // Mirror to firehose subscribers, batch of one.
            for handler in locked.registry.firehose() {
                handler.push_out_of_band(vec![oobm.clone()]).await;
            }
            locked.registry.prune();

            if oobm.system == SYSTEM_RECONNECT {
                debug!("reconnected to push server");
                return Ok(());
            }
            return match locked.registry.system(&oobm.system) {
                Some(handler) => handler.handle(oobm).await,
                None => Err(ClientError::UnhandledSystem(oobm.system.clone())),
            };
        }

        warn!("broadcast: both in-band and out-of-band message nil");
        Err(ClientError::InvalidMessage("empty broadcast".into()))
    }
}

// =============================================================================
// Connection Events
// =============================================================================

#[async_trait]
impl ConnectionEvents for PushInner {
    /// Authentication and sync, run under the client lock. Errors here
    /// reject the connection; permanent auth failures additionally set
    /// the one-shot skip-retry flag.
    async fn on_connect(&self, rpc: RpcClient) -> ClientResult<()> {
        if self.shut.load(Ordering::SeqCst) {
            debug!("shut down, not authenticating");
            return Err(ClientError::ShuttingDown);
        }

        let mut locked = self.locked.lock().await;
        debug!("connected, authenticating");

        let session = match self.session.current().await {
            Ok(session) => session,
            Err(err) => {
                self.skip_retry_connect.store(true, Ordering::SeqCst);
                return Err(err);
            }
        };
        if session.token.is_empty() {
            self.skip_retry_connect.store(true, Ordering::SeqCst);
            return Err(ClientError::NotLoggedIn);
        }

        let wrapped = TimeoutRpc::new(rpc, self.config.request_timeout);
        let auth = wrapped.authenticate(&session.token).await?;
        if auth.uid != session.uid {
            self.skip_retry_connect.store(true, Ordering::SeqCst);
            return Err(ClientError::AuthFailed(format!(
                "auth uid {} does not match session uid {}",
                auth.uid, session.uid
            )));
        }
        debug!(session_id = %auth.session_id, "authenticated");
        locked.session_id = Some(auth.session_id);
        locked.uid = Some(session.uid.clone());
        if locked.state.is_none() {
            locked.state = Some(StateMachine::new(session.uid.clone()));
        }
        locked.rpc = Some(wrapped.clone());

        // Sync down everything since we have been dead. A sync failure
        // does not reject the connection.
        if let Err(err) = self.server_sync(&mut locked, &wrapped).await {
            error!(%err, "sync failure");
        }
        drop(locked);

        self.spawn_badge_resync();
        self.spawn_reconnect_broadcast(session.uid);
        Ok(())
    }

    async fn on_disconnected(&self) {
        debug!("disconnected from broker");
        let mut locked = self.locked.lock().await;
        locked.rpc = None;
    }

    /// The single inbound funnel, called by the transport for every
    /// broadcast frame in arrival order.
    async fn broadcast(&self, message: Message) -> ClientResult<()> {
        if self.shut.load(Ordering::SeqCst) {
            // Frames still queued at shutdown must not reach handlers.
            return Err(ClientError::ShuttingDown);
        }
        let mut locked = self.locked.lock().await;
        self.broadcast_locked(&mut locked, message).await
    }

    fn should_retry_on_connect(&self, err: &ClientError) -> bool {
        debug!(%err, "should retry on connect");
        if self.skip_retry_connect.swap(false, Ordering::SeqCst) {
            debug!("skip retry flag set, returning false");
            return false;
        }
        true
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for a [`PushClient`] with optional collaborators.
pub struct PushClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn LocalStore>>,
    session: Option<Arc<dyn SessionProvider>>,
    clock: Option<Arc<dyn Clock>>,
    badge_sink: Option<Arc<dyn BadgeSink>>,
}

impl PushClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        PushClientBuilder {
            config,
            store: None,
            session: None,
            clock: None,
            badge_sink: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_session(mut self, session: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_badge_sink(mut self, badge_sink: Arc<dyn BadgeSink>) -> Self {
        self.badge_sink = Some(badge_sink);
        self
    }

    pub fn build(self) -> ClientResult<PushClient> {
        let store = self
            .store
            .ok_or_else(|| ClientError::Config("local store required".into()))?;
        let session = self
            .session
            .ok_or_else(|| ClientError::Config("session provider required".into()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let badge_sink = self.badge_sink.unwrap_or_else(|| Arc::new(NoOpBadgeSink));
        Ok(PushClient::from_parts(
            self.config,
            store,
            session,
            clock,
            badge_sink,
        ))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
