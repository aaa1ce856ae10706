//! # Connection Manager
//!
//! Owns the WebSocket transport: dials TLS or plain, reconnects on a
//! constant interval, runs the keepalive ping loop, and reports lifecycle
//! events to its owner.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Connection States                                    │
//! │                                                                         │
//! │  ┌──────┐  connect()   ┌─────────┐   dial ok    ┌────────────────┐     │
//! │  │ Idle │ ───────────► │ Dialing │ ───────────► │ Authenticating │     │
//! │  └──────┘              └────┬────┘              └───────┬────────┘     │
//! │                             ▲                           │              │
//! │                             │ constant backoff          │ on_connect   │
//! │                             │ (default 2 s)             ▼              │
//! │                      ┌──────┴───────┐  drop/error  ┌───────────┐       │
//! │                      │ Disconnected │ ◄─────────── │ Connected │       │
//! │                      └──────────────┘              └───────────┘       │
//! │                                                                         │
//! │  The backoff never gives up, unless shutdown() is called or the        │
//! │  owner's on_connect failed permanently (skip-retry, one shot).         │
//! │                                                                         │
//! │  PING LOOP (one per manager, started on first successful dial)         │
//! │  ──────────────────────────────────────────────────────────────        │
//! │  every ping_interval: skip if not connected, else Ping with           │
//! │  ping_timeout deadline. Timeout ⇒ shutdown() + connect(uri).           │
//! │  Any other error is logged and ignored.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use backoff::backoff::{Backoff, Constant};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{
    connect_async, connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;

use beacon_core::Message;

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{BroadcastPayload, EmptyPayload, WireKind, WireMessage};
use crate::rpc::{RpcClient, TimeoutRpc};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Dialing,
    Authenticating,
    Connected,
    Disconnected,
    ShutDown,
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnState::Idle => write!(f, "idle"),
            ConnState::Dialing => write!(f, "dialing"),
            ConnState::Authenticating => write!(f, "authenticating"),
            ConnState::Connected => write!(f, "connected"),
            ConnState::Disconnected => write!(f, "disconnected"),
            ConnState::ShutDown => write!(f, "shut down"),
        }
    }
}

// =============================================================================
// Owner Events
// =============================================================================

/// Capability the connection manager calls back into. The push client
/// implements this; the manager never learns the concrete type, which
/// keeps the manager/client reference cycle broken.
#[async_trait]
pub trait ConnectionEvents: Send + Sync {
    /// Called after each successful dial with a handle for the new
    /// connection. The owner authenticates and syncs in here; an error
    /// return rejects the connection and triggers a reconnect.
    async fn on_connect(&self, rpc: RpcClient) -> ClientResult<()>;

    /// Called after the transport drops.
    async fn on_disconnected(&self);

    /// Called for every broadcast frame pushed by the broker, in arrival
    /// order.
    async fn broadcast(&self, message: Message) -> ClientResult<()>;

    /// Consulted after a failed `on_connect`. Returning false suppresses
    /// the reconnect; implementations consume their skip-retry flag here.
    fn should_retry_on_connect(&self, err: &ClientError) -> bool;
}

// =============================================================================
// Control Channel
// =============================================================================

/// Value broadcast on the control channel. Each `connect` bumps the
/// epoch; stale lifecycle tasks notice and exit.
#[derive(Debug, Clone, Copy)]
struct Control {
    epoch: u64,
    shut: bool,
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Owns the transport and its lifecycle tasks.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    config: Arc<ClientConfig>,
    clock: Arc<dyn Clock>,
    events: Weak<dyn ConnectionEvents>,

    state: RwLock<ConnState>,

    /// The connection lock: guards the live RPC handle and the dial URI.
    /// Held only briefly, never across an RPC.
    current: Mutex<Option<RpcClient>>,
    uri: Mutex<Option<Url>>,

    control_tx: watch::Sender<Control>,
    ping_started: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<ClientConfig>,
        clock: Arc<dyn Clock>,
        events: Weak<dyn ConnectionEvents>,
    ) -> Self {
        let (control_tx, _) = watch::channel(Control {
            epoch: 0,
            shut: false,
        });
        ConnectionManager {
            inner: Arc::new(ConnInner {
                config,
                clock,
                events,
                state: RwLock::new(ConnState::Idle),
                current: Mutex::new(None),
                uri: Mutex::new(None),
                control_tx,
                ping_started: AtomicBool::new(false),
            }),
        }
    }

    /// Begins the connection lifecycle. Non-blocking: returns once the
    /// dial task is scheduled.
    pub fn connect(&self, uri: Url) {
        self.inner.connect(uri);
    }

    /// Tears down the transport and stops the lifecycle tasks.
    /// Idempotent; subsequent broadcasts are undeliverable.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Cheap check consulted by the ping loop and handler registration.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn state(&self) -> ConnState {
        *self.inner.state.read().expect("state lock poisoned")
    }

    /// The RPC handle of the live connection, if any.
    pub fn current_rpc(&self) -> Option<RpcClient> {
        self.inner.current_rpc()
    }
}

impl ConnInner {
    fn connect(self: &Arc<Self>, uri: Url) {
        let epoch = {
            let mut guard = self.uri.lock().expect("uri lock poisoned");
            *guard = Some(uri.clone());
            let next = self.control_tx.borrow().epoch + 1;
            self.control_tx.send_replace(Control {
                epoch: next,
                shut: false,
            });
            next
        };
        info!(%uri, epoch, "scheduling broker dial");
        let inner = self.clone();
        tokio::spawn(async move {
            inner.run(epoch, uri).await;
        });
    }

    fn shutdown(self: &Arc<Self>) {
        {
            let control = *self.control_tx.borrow();
            if control.shut {
                // Already shut down; keep it idempotent.
                return;
            }
            self.control_tx.send_replace(Control {
                epoch: control.epoch + 1,
                shut: true,
            });
        }
        debug!("connection manager shutdown");
        let current = {
            let mut guard = self.current.lock().expect("connection lock poisoned");
            guard.take()
        };
        if let Some(rpc) = current {
            rpc.fail_pending();
        }
        self.set_state(ConnState::ShutDown);
    }

    fn is_connected(&self) -> bool {
        *self.state.read().expect("state lock poisoned") == ConnState::Connected
    }

    fn is_shut_down(&self) -> bool {
        self.control_tx.borrow().shut
    }

    fn is_stale(&self, my_epoch: u64) -> bool {
        let control = *self.control_tx.borrow();
        control.shut || control.epoch != my_epoch
    }

    fn current_rpc(&self) -> Option<RpcClient> {
        self.current.lock().expect("connection lock poisoned").clone()
    }

    fn set_state(&self, state: ConnState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    fn events(&self) -> Option<Arc<dyn ConnectionEvents>> {
        self.events.upgrade()
    }

    // =========================================================================
    // Lifecycle Loop
    // =========================================================================

    /// One reconnect loop per `connect` call. Dials, hands the connection
    /// to the owner, waits for it to drop, sleeps the constant backoff,
    /// repeats.
    async fn run(self: Arc<Self>, my_epoch: u64, uri: Url) {
        let mut control_rx = self.control_tx.subscribe();
        // Constant backoff: the broker client retries on a fixed interval
        // forever, it never backs off exponentially.
        let mut backoff = Constant::new(self.config.reconnect_interval);

        loop {
            if self.is_stale(my_epoch) {
                break;
            }
            self.set_state(ConnState::Dialing);

            match dial(&uri, &self.config).await {
                Ok(ws) => {
                    if !self.serve_connection(my_epoch, ws, &uri).await {
                        break;
                    }
                }
                Err(err) => {
                    error!(%uri, %err, "dial failed");
                }
            }

            if self.is_stale(my_epoch) {
                break;
            }
            self.set_state(ConnState::Disconnected);

            let Some(interval) = backoff.next_backoff() else {
                break;
            };
            debug!(?interval, "waiting before reconnect");
            tokio::select! {
                _ = self.clock.sleep(interval) => {}
                _ = shut_or_stale(&mut control_rx, my_epoch) => break,
            }
        }

        debug!(epoch = my_epoch, "connection lifecycle ended");
    }

    /// Drives one established connection. Returns false when the
    /// lifecycle loop should stop retrying.
    async fn serve_connection(self: &Arc<Self>, my_epoch: u64, ws: WsStream, uri: &Url) -> bool {
        info!("websocket connected");

        let (outgoing_tx, outgoing_rx) = mpsc::channel::<WireMessage>(64);
        let (broadcast_tx, broadcast_rx) = mpsc::channel::<InboundBroadcast>(256);
        let rpc = RpcClient::new(outgoing_tx);

        let pump = tokio::spawn(connection_loop(
            ws,
            outgoing_rx,
            rpc.clone(),
            broadcast_tx,
            self.control_tx.subscribe(),
        ));
        let broadcaster = tokio::spawn(broadcast_loop(
            self.events.clone(),
            broadcast_rx,
            rpc.clone(),
        ));

        self.set_state(ConnState::Authenticating);
        {
            let mut guard = self.current.lock().expect("connection lock poisoned");
            *guard = Some(rpc.clone());
        }

        let Some(events) = self.events() else {
            // Owner is gone; nothing left to serve.
            pump.abort();
            return false;
        };

        match events.on_connect(rpc.clone()).await {
            Ok(()) => {
                self.set_state(ConnState::Connected);
                self.start_ping_loop_once();
                // Hold here until the transport drops or shutdown hits.
                let _ = pump.await;
            }
            Err(err) => {
                warn!(%err, "connection rejected by owner");
                pump.abort();
                let retry = events.should_retry_on_connect(&err);
                drop(events);
                self.teardown_current(&rpc);
                broadcaster.abort();
                if !retry {
                    debug!("skip-retry consumed, not reconnecting");
                    self.set_state(ConnState::Disconnected);
                    return false;
                }
                return true;
            }
        }

        self.teardown_current(&rpc);
        // The pump is gone, so the broadcaster's queue drains and closes.
        let _ = broadcaster.await;

        if let Some(events) = self.events() {
            events.on_disconnected().await;
        }
        debug!(%uri, epoch = my_epoch, "connection dropped");
        true
    }

    fn teardown_current(&self, rpc: &RpcClient) {
        rpc.fail_pending();
        let mut guard = self.current.lock().expect("connection lock poisoned");
        *guard = None;
    }

    // =========================================================================
    // Ping Loop
    // =========================================================================

    /// Starts the keepalive loop exactly once per manager, on the first
    /// successful dial.
    fn start_ping_loop_once(self: &Arc<Self>) {
        if self.ping_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.clone();
        tokio::spawn(async move {
            inner.ping_loop().await;
        });
    }

    async fn ping_loop(self: Arc<Self>) {
        let interval = self.config.ping_interval;
        let ping_timeout = self.config.ping_timeout;
        let mut control_rx = self.control_tx.subscribe();
        debug!(?interval, ?ping_timeout, "ping loop: starting up");

        loop {
            tokio::select! {
                _ = self.clock.sleep(interval) => {}
                _ = shut_signal(&mut control_rx) => {
                    debug!("ping loop: terminating");
                    return;
                }
            }
            if self.is_shut_down() {
                debug!("ping loop: terminating");
                return;
            }
            if !self.is_connected() {
                debug!("ping loop: skipping ping since not connected");
                continue;
            }
            let Some(rpc) = self.current_rpc() else {
                continue;
            };

            let wrapped = TimeoutRpc::new(rpc, self.config.request_timeout);
            match wrapped.ping(ping_timeout).await {
                Ok(()) => {}
                Err(ClientError::Timeout) => {
                    warn!("ping loop: timeout: terminating connection");
                    self.shutdown();
                    let uri = self.uri.lock().expect("uri lock poisoned").clone();
                    if let Some(uri) = uri {
                        self.connect(uri);
                    }
                }
                Err(err) => {
                    debug!(%err, "ping loop: ignoring ping failure");
                }
            }
        }
    }
}

/// Resolves when the manager is shut down.
async fn shut_signal(rx: &mut watch::Receiver<Control>) {
    loop {
        if rx.borrow_and_update().shut {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Resolves when the manager is shut down or this epoch was replaced.
async fn shut_or_stale(rx: &mut watch::Receiver<Control>, my_epoch: u64) {
    loop {
        {
            let control = *rx.borrow_and_update();
            if control.shut || control.epoch != my_epoch {
                return;
            }
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// =============================================================================
// Dialing
// =============================================================================

/// Dials the broker. `wss://` requires a bundled root CA for the host;
/// `ws://` connects in the clear (development brokers).
async fn dial(uri: &Url, config: &ClientConfig) -> ClientResult<WsStream> {
    let result = match uri.scheme() {
        "wss" => {
            let host = uri
                .host_str()
                .ok_or_else(|| ClientError::InvalidUri("missing host".into()))?;
            debug!(%uri, "dialing broker via TLS");
            let connector = tls_connector(config, host)?;
            timeout(
                config.connect_timeout,
                connect_async_tls_with_config(uri.as_str(), None, false, Some(connector)),
            )
            .await
        }
        "ws" => {
            debug!(%uri, "dialing broker without TLS");
            timeout(config.connect_timeout, connect_async(uri.as_str())).await
        }
        other => {
            return Err(ClientError::InvalidUri(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };

    match result {
        Ok(Ok((ws, response))) => {
            debug!(status = ?response.status(), "websocket handshake complete");
            Ok(ws)
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(ClientError::Connection(format!(
            "dial timed out after {:?}",
            config.connect_timeout
        ))),
    }
}

/// Builds a TLS connector trusting only the bundled CA for this host.
fn tls_connector(config: &ClientConfig, host: &str) -> ClientResult<Connector> {
    let pem = config
        .bundled_cas
        .get(host)
        .ok_or_else(|| ClientError::MissingCa(host.to_string()))?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| ClientError::Connection(format!("bad bundled CA: {}", e)))?;
        roots
            .add(cert)
            .map_err(|e| ClientError::Connection(format!("bad bundled CA: {}", e)))?;
    }

    let tls = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Connector::Rustls(Arc::new(tls)))
}

// =============================================================================
// Frame Pump
// =============================================================================

/// An inbound broadcast frame: the correlation ID to acknowledge (if
/// any) and the decoded message.
type InboundBroadcast = (Option<String>, Message);

/// Pumps frames in both directions for one connection. Responses resolve
/// pending calls directly; broadcast frames are queued for ordered
/// delivery so a slow handler can never stall the pump (which would
/// deadlock the very RPCs the handler is waiting on).
async fn connection_loop(
    ws: WsStream,
    mut outgoing_rx: mpsc::Receiver<WireMessage>,
    rpc: RpcClient,
    broadcast_tx: mpsc::Sender<InboundBroadcast>,
    mut control_rx: watch::Receiver<Control>,
) -> ClientResult<()> {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            Some(outbound) = outgoing_rx.recv() => {
                let json = outbound.to_json()?;
                write.send(WsMessage::Text(json.into())).await?;
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match WireMessage::from_json(&text) {
                            Ok(wire) => {
                                route_inbound(wire, &rpc, &broadcast_tx).await;
                            }
                            Err(err) => {
                                warn!(%err, "failed to parse inbound frame");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        write.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "received close frame");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        error!(%err, "websocket error");
                        return Err(err.into());
                    }
                    None => return Ok(()),
                }
            }

            _ = control_rx.changed() => {
                // Shutdown or a newer connect: close politely and leave.
                let _ = write.send(WsMessage::Close(None)).await;
                return Ok(());
            }
        }
    }
}

async fn route_inbound(
    wire: WireMessage,
    rpc: &RpcClient,
    broadcast_tx: &mpsc::Sender<InboundBroadcast>,
) {
    if wire.kind == WireKind::Broadcast {
        let reply_to = wire.message_id.clone();
        match wire.extract_payload::<BroadcastPayload>() {
            Ok(payload) => {
                if broadcast_tx.send((reply_to, payload.message)).await.is_err() {
                    warn!("broadcast consumer gone, dropping frame");
                }
            }
            Err(err) => warn!(%err, "malformed broadcast frame"),
        }
        return;
    }
    if !rpc.complete(wire) {
        debug!("dropping unsolicited response frame");
    }
}

/// Delivers broadcasts serially, in arrival order, and acknowledges each
/// one back to the broker.
async fn broadcast_loop(
    events: Weak<dyn ConnectionEvents>,
    mut broadcast_rx: mpsc::Receiver<InboundBroadcast>,
    rpc: RpcClient,
) {
    while let Some((reply_to, message)) = broadcast_rx.recv().await {
        let Some(events) = events.upgrade() else {
            return;
        };
        let result = events.broadcast(message).await;

        if let Err(err) = &result {
            debug!(%err, "broadcast rejected");
        }
        if let Some(id) = reply_to {
            let frame = match &result {
                Ok(()) => WireMessage::response_to(&id, WireKind::BroadcastAck, &EmptyPayload {})
                    .unwrap_or_else(|_| WireMessage::error_response(&id, &ClientError::Channel(
                        "ack encode failed".into(),
                    ))),
                Err(err) => WireMessage::error_response(&id, err),
            };
            if rpc.notify(frame).await.is_err() {
                debug!("connection gone before broadcast ack");
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
