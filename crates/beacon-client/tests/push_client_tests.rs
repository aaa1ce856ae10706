//! End-to-end tests for the push client against an in-process mock broker.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};

use beacon_client::protocol::{
    AuthOkPayload, BroadcastPayload, ConsumePayload, EmptyPayload, SyncOkPayload, SyncPayload,
    WireKind, WireMessage,
};
use beacon_client::{
    ClientConfig, ClientError, ClientResult, FirehoseHandler, InBandHandler, PushClient,
    PushReason, StaticSession,
};
use beacon_core::{
    Body, Category, InBandMessage, Item, Message, Metadata, MsgId, OutOfBandMessage,
    StateSnapshot, StateSync, StateUpdate, Uid, SYSTEM_RECONNECT,
};
use beacon_store::MemoryStore;

const WAIT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("beacon_client=debug,beacon_core=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn uid() -> Uid {
    Uid::from_bytes(vec![0x11]).unwrap()
}

// =============================================================================
// Mock Broker
// =============================================================================

enum BrokerCmd {
    Push(WireMessage, oneshot::Sender<WireMessage>),
    Close,
}

struct BrokerInner {
    /// UID returned by Auth; tests override it to simulate a mismatch.
    auth_uid: Mutex<Uid>,

    /// Items returned for a fresh sync (as one StateSync message).
    dump_items: Mutex<Vec<Item>>,

    /// Messages returned for incremental syncs.
    incremental: Mutex<Vec<Message>>,

    /// Every `since` value the broker was asked to sync from.
    sync_requests: Mutex<Vec<Option<DateTime<Utc>>>>,

    /// Messages received on the Consume write path.
    consumed: Mutex<Vec<Message>>,

    /// Echo consumed messages back as broadcasts (stamping ctime).
    echo_consume: AtomicBool,

    /// Stop answering pings on the first connection.
    drop_pings_first_conn: AtomicBool,

    conn_count: AtomicUsize,
    current: tokio::sync::Mutex<Option<mpsc::Sender<BrokerCmd>>>,
}

struct Broker {
    addr: SocketAddr,
    inner: Arc<BrokerInner>,
}

impl Broker {
    async fn start(uid: Uid) -> Broker {
        let inner = Arc::new(BrokerInner {
            auth_uid: Mutex::new(uid),
            dump_items: Mutex::new(Vec::new()),
            incremental: Mutex::new(Vec::new()),
            sync_requests: Mutex::new(Vec::new()),
            consumed: Mutex::new(Vec::new()),
            echo_consume: AtomicBool::new(false),
            drop_pings_first_conn: AtomicBool::new(false),
            conn_count: AtomicUsize::new(0),
            current: tokio::sync::Mutex::new(None),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_inner = inner.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seq = accept_inner.conn_count.fetch_add(1, Ordering::SeqCst) + 1;
                let conn_inner = accept_inner.clone();
                tokio::spawn(async move {
                    serve_conn(conn_inner, stream, seq).await;
                });
            }
        });

        Broker { addr, inner }
    }

    fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    fn conn_count(&self) -> usize {
        self.inner.conn_count.load(Ordering::SeqCst)
    }

    fn sync_requests(&self) -> Vec<Option<DateTime<Utc>>> {
        self.inner.sync_requests.lock().unwrap().clone()
    }

    fn set_incremental(&self, messages: Vec<Message>) {
        *self.inner.incremental.lock().unwrap() = messages;
    }

    fn set_auth_uid(&self, uid: Uid) {
        *self.inner.auth_uid.lock().unwrap() = uid;
    }

    fn enable_echo(&self) {
        self.inner.echo_consume.store(true, Ordering::SeqCst);
    }

    fn drop_pings_on_first_conn(&self) {
        self.inner.drop_pings_first_conn.store(true, Ordering::SeqCst);
    }

    /// Pushes a broadcast frame and waits for the client's ack or error
    /// reply. Returns `None` when the connection died first.
    async fn push(&self, message: Message) -> Option<WireMessage> {
        let wire =
            WireMessage::request(WireKind::Broadcast, &BroadcastPayload { message }).unwrap();
        let (tx, rx) = oneshot::channel();
        let sender = self.inner.current.lock().await.clone()?;
        sender.send(BrokerCmd::Push(wire, tx)).await.ok()?;
        tokio::time::timeout(WAIT, rx).await.ok()?.ok()
    }

    /// Closes the current connection from the broker side.
    async fn close_current(&self) {
        if let Some(sender) = self.inner.current.lock().await.clone() {
            let _ = sender.send(BrokerCmd::Close).await;
        }
    }
}

async fn serve_conn(inner: Arc<BrokerInner>, stream: TcpStream, conn_seq: usize) {
    let ws: WebSocketStream<TcpStream> = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut write, mut read) = ws.split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<BrokerCmd>(16);
    *inner.current.lock().await = Some(cmd_tx);

    let mut pending: HashMap<String, oneshot::Sender<WireMessage>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(BrokerCmd::Push(wire, reply)) => {
                    if let Some(id) = wire.message_id.clone() {
                        pending.insert(id, reply);
                    }
                    let json = wire.to_json().unwrap();
                    if write.send(WsMessage::Text(json.into())).await.is_err() {
                        return;
                    }
                }
                Some(BrokerCmd::Close) | None => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return;
                }
            },

            frame = read.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    _ => return,
                };
                match frame {
                    WsMessage::Text(text) => {
                        let wire = WireMessage::from_json(&text).unwrap();
                        match wire.kind {
                            WireKind::BroadcastAck | WireKind::Error => {
                                if let Some(id) = &wire.message_id {
                                    if let Some(tx) = pending.remove(id) {
                                        let _ = tx.send(wire);
                                    }
                                }
                            }
                            _ => {
                                for reply in handle_request(&inner, conn_seq, &wire) {
                                    let json = reply.to_json().unwrap();
                                    if write.send(WsMessage::Text(json.into())).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    WsMessage::Ping(data) => {
                        let _ = write.send(WsMessage::Pong(data)).await;
                    }
                    WsMessage::Close(_) => return,
                    _ => {}
                }
            }
        }
    }
}

fn handle_request(inner: &BrokerInner, conn_seq: usize, wire: &WireMessage) -> Vec<WireMessage> {
    let Some(request_id) = wire.message_id.clone() else {
        return Vec::new();
    };

    match wire.kind {
        WireKind::Auth => {
            let uid = inner.auth_uid.lock().unwrap().clone();
            vec![WireMessage::response_to(
                &request_id,
                WireKind::AuthOk,
                &AuthOkPayload {
                    uid,
                    session_id: format!("session-{}", conn_seq),
                },
            )
            .unwrap()]
        }

        WireKind::Sync => {
            let payload: SyncPayload = wire.extract_payload().unwrap();
            inner.sync_requests.lock().unwrap().push(payload.since);

            let messages = match payload.since {
                // Fresh sync: a full state dump as one StateSync message.
                None => {
                    let items = inner.dump_items.lock().unwrap().clone();
                    vec![Message::in_band(InBandMessage::StateSync(StateSync {
                        md: Metadata {
                            uid: uid(),
                            msg_id: MsgId::from_bytes(uuid::Uuid::new_v4().as_bytes().to_vec())
                                .unwrap(),
                            device_id: None,
                            ctime: Utc::now(),
                        },
                        items,
                    }))]
                }
                Some(_) => inner.incremental.lock().unwrap().clone(),
            };
            vec![WireMessage::response_to(
                &request_id,
                WireKind::SyncOk,
                &SyncOkPayload { messages },
            )
            .unwrap()]
        }

        WireKind::Consume => {
            let payload: ConsumePayload = wire.extract_payload().unwrap();
            let mut message = payload.message;
            inner.consumed.lock().unwrap().push(message.clone());

            let mut replies = vec![WireMessage::response_to(
                &request_id,
                WireKind::ConsumeOk,
                &EmptyPayload {},
            )
            .unwrap()];

            if inner.echo_consume.load(Ordering::SeqCst) {
                // The broker stamps the server-assigned creation time on
                // the echo.
                if let Some(InBandMessage::StateUpdate(update)) = message.ibm.as_mut() {
                    update.md.ctime = Utc::now();
                }
                replies.push(
                    WireMessage::request(WireKind::Broadcast, &BroadcastPayload { message })
                        .unwrap(),
                );
            }
            replies
        }

        WireKind::Ping => {
            if conn_seq == 1 && inner.drop_pings_first_conn.load(Ordering::SeqCst) {
                return Vec::new();
            }
            vec![WireMessage::response_to(&request_id, WireKind::Pong, &EmptyPayload {}).unwrap()]
        }

        _ => Vec::new(),
    }
}

// =============================================================================
// Test Handlers
// =============================================================================

#[derive(Default)]
struct RecordingHandler {
    creates: Mutex<Vec<Item>>,
    dismisses: Mutex<Vec<Item>>,
}

#[async_trait]
impl InBandHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }
    fn is_alive(&self) -> bool {
        true
    }
    async fn create(&self, _category: &Category, item: &Item) -> (bool, ClientResult<()>) {
        self.creates.lock().unwrap().push(item.clone());
        (true, Ok(()))
    }
    async fn dismiss(&self, _category: &Category, item: &Item) -> (bool, ClientResult<()>) {
        self.dismisses.lock().unwrap().push(item.clone());
        (true, Ok(()))
    }
}

#[derive(Default)]
struct RecordingFirehose {
    states: Mutex<Vec<(StateSnapshot, PushReason)>>,
    oobms: Mutex<Vec<OutOfBandMessage>>,
}

#[async_trait]
impl FirehoseHandler for RecordingFirehose {
    fn is_alive(&self) -> bool {
        true
    }
    async fn push_state(&self, state: StateSnapshot, reason: PushReason) {
        self.states.lock().unwrap().push((state, reason));
    }
    async fn push_out_of_band(&self, messages: Vec<OutOfBandMessage>) {
        self.oobms.lock().unwrap().extend(messages);
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn fast_config() -> ClientConfig {
    ClientConfig::default()
        .reconnect_interval(Duration::from_millis(100))
        .connect_timeout(Duration::from_secs(2))
        .request_timeout(Duration::from_secs(2))
        // Keep the keepalive quiet unless a test wants it.
        .ping_interval(Duration::from_secs(60))
}

fn new_client(config: ClientConfig) -> PushClient {
    PushClient::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(StaticSession::new("test-token", uid())),
    )
}

fn creation_message(msg_id: &[u8], category: &str, body: &[u8]) -> Message {
    Message::in_band(InBandMessage::StateUpdate(StateUpdate {
        md: Metadata {
            uid: uid(),
            msg_id: MsgId::from_bytes(msg_id.to_vec()).unwrap(),
            device_id: None,
            ctime: Utc::now(),
        },
        creation: Some(beacon_core::Creation {
            category: Category::new(category),
            body: Body::from(body),
        }),
        dismissal: None,
    }))
}

fn dismissal_message(msg_id: &[u8], target: &[u8]) -> Message {
    Message::in_band(InBandMessage::StateUpdate(StateUpdate {
        md: Metadata {
            uid: uid(),
            msg_id: MsgId::from_bytes(msg_id.to_vec()).unwrap(),
            device_id: None,
            ctime: Utc::now(),
        },
        creation: None,
        dismissal: Some(beacon_core::Dismissal {
            msg_ids: vec![MsgId::from_bytes(target.to_vec()).unwrap()],
            ranges: Vec::new(),
        }),
    }))
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if cond() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_connected(client: &PushClient) {
    let client = client.clone();
    wait_for("client to connect", move || client.is_connected()).await;
}

// =============================================================================
// Scenarios
// =============================================================================

// S1: a streamed creation reaches the handler, the state machine, and
// the firehose with reason NewData.
#[tokio::test]
async fn test_creation_broadcast_flows_to_handler_state_and_firehose() {
    init_tracing();
    let broker = Broker::start(uid()).await;
    let client = new_client(fast_config());

    let handler = Arc::new(RecordingHandler::default());
    let firehose = Arc::new(RecordingFirehose::default());
    client.push_handler(handler.clone()).await;
    client.push_firehose_handler(firehose.clone()).await;

    client.connect(&broker.url()).await.unwrap();
    wait_connected(&client).await;

    let reply = broker
        .push(creation_message(&[0x01], "tracker", b"{\"uid\":\"u1\"}"))
        .await
        .expect("broadcast reply");
    assert_eq!(reply.kind, WireKind::BroadcastAck);

    let creates = handler.creates.lock().unwrap().clone();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].msg_id.as_bytes(), &[0x01]);
    assert_eq!(creates[0].body.as_bytes(), b"{\"uid\":\"u1\"}");

    let state = client.get_state().await.unwrap();
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items[0].msg_id.as_bytes(), &[0x01]);

    let states = firehose.states.lock().unwrap();
    assert!(states
        .iter()
        .any(|(s, r)| *r == PushReason::NewData && s.items.len() == 1));
}

// S2: resending the same creation is a repeat: rejected on the wire,
// handler not called again, state unchanged.
#[tokio::test]
async fn test_repeat_broadcast_rejected_without_redispatch() {
    init_tracing();
    let broker = Broker::start(uid()).await;
    let client = new_client(fast_config());
    let handler = Arc::new(RecordingHandler::default());
    client.push_handler(handler.clone()).await;

    client.connect(&broker.url()).await.unwrap();
    wait_connected(&client).await;

    let first = broker
        .push(creation_message(&[0x01], "tracker", b"x"))
        .await
        .unwrap();
    assert_eq!(first.kind, WireKind::BroadcastAck);

    let second = broker
        .push(creation_message(&[0x01], "tracker", b"x"))
        .await
        .unwrap();
    assert_eq!(second.kind, WireKind::Error);
    let json = second.to_json().unwrap();
    assert!(json.contains("repeat"));

    assert_eq!(handler.creates.lock().unwrap().len(), 1);
    assert_eq!(client.get_state().await.unwrap().items.len(), 1);
}

// S3: an injected item comes back via the broker echo and lands in local
// state exactly once.
#[tokio::test]
async fn test_inject_echo_updates_local_state() {
    init_tracing();
    let broker = Broker::start(uid()).await;
    broker.enable_echo();
    let client = new_client(fast_config());
    let handler = Arc::new(RecordingHandler::default());
    client.push_handler(handler.clone()).await;

    client.connect(&broker.url()).await.unwrap();
    wait_connected(&client).await;

    let msg_id = client.inject_item("cat", &[0xDE, 0xAD]).await.unwrap();

    {
        let handler = handler.clone();
        let expected = msg_id.clone();
        wait_for("echoed creation to reach the handler", move || {
            handler
                .creates
                .lock()
                .unwrap()
                .iter()
                .any(|item| item.msg_id == expected)
        })
        .await;
    }

    let state = client.get_state().await.unwrap();
    assert!(state.items.iter().any(|item| item.msg_id == msg_id));
    let seen = handler
        .creates
        .lock()
        .unwrap()
        .iter()
        .filter(|item| item.msg_id == msg_id)
        .count();
    assert_eq!(seen, 1);

    // The write went through the broker, not local state.
    assert_eq!(broker.inner.consumed.lock().unwrap().len(), 1);

    // Dismissing the item follows the same echo path.
    client.dismiss_item(&msg_id).await.unwrap();
    {
        let handler = handler.clone();
        let expected = msg_id.clone();
        wait_for("echoed dismissal to reach the handler", move || {
            handler
                .dismisses
                .lock()
                .unwrap()
                .iter()
                .any(|item| item.msg_id == expected)
        })
        .await;
    }
    assert!(client.get_state().await.unwrap().items.is_empty());
}

// S4: after a reconnect, an incremental sync applies a dismissal and
// replays it against live handlers, the firehose receives a Reconnected
// snapshot, and the synthetic internal.reconnect out-of-band broadcast
// fires.
#[tokio::test]
async fn test_reconnect_syncs_dismissal_from_watermark() {
    init_tracing();
    let broker = Broker::start(uid()).await;
    let client = new_client(fast_config());
    let handler = Arc::new(RecordingHandler::default());
    let firehose = Arc::new(RecordingFirehose::default());
    client.push_handler(handler.clone()).await;
    client.push_firehose_handler(firehose.clone()).await;

    client.connect(&broker.url()).await.unwrap();
    wait_connected(&client).await;

    broker
        .push(creation_message(&[0x0a], "tracker", b"a"))
        .await
        .unwrap();
    broker
        .push(creation_message(&[0x0b], "tracker", b"b"))
        .await
        .unwrap();
    assert_eq!(client.get_state().await.unwrap().items.len(), 2);

    // The next (incremental) sync dismisses A.
    broker.set_incremental(vec![dismissal_message(&[0x0f], &[0x0a])]);
    broker.close_current().await;

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let state = client.get_state().await.unwrap();
        if state.items.len() == 1 && state.items[0].msg_id.as_bytes() == [0x0b] {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for the reconnect sync to dismiss A");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Second connection, incremental sync from the watermark.
    assert_eq!(broker.conn_count(), 2);
    let syncs = broker.sync_requests();
    assert_eq!(syncs.len(), 2);
    assert_eq!(syncs[0], None);
    assert!(syncs[1].is_some());

    // The replayed dismissal reached the handler exactly once, with the
    // dismissed item.
    let dismisses = handler.dismisses.lock().unwrap();
    let dismissed_a = dismisses
        .iter()
        .filter(|item| item.msg_id.as_bytes() == [0x0a])
        .count();
    assert_eq!(dismissed_a, 1);
    drop(dismisses);

    let states = firehose.states.lock().unwrap();
    assert!(states
        .iter()
        .any(|(s, r)| *r == PushReason::Reconnected && s.items.len() == 1));
    drop(states);

    let oobms = firehose.oobms.lock().unwrap();
    assert!(oobms.iter().any(|m| m.system == SYSTEM_RECONNECT));
}

// S5: a UID mismatch on auth is permanent: the connection is rejected
// and no further dial happens for that attempt.
#[tokio::test]
async fn test_auth_uid_mismatch_suppresses_reconnect() {
    init_tracing();
    let broker = Broker::start(uid()).await;
    broker.set_auth_uid(Uid::from_bytes(vec![0x22]).unwrap());
    let client = new_client(fast_config());

    client.connect(&broker.url()).await.unwrap();

    // Give the client ample time to (wrongly) retry.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(broker.conn_count(), 1);
    assert!(!client.is_connected());
}

// S6: a ping timeout recycles the connection, and the post-reconnect
// sync resumes from the pre-crash watermark instead of zero.
#[tokio::test]
async fn test_ping_timeout_reconnects_and_resumes_from_watermark() {
    init_tracing();
    let broker = Broker::start(uid()).await;
    let config = fast_config()
        .ping_interval(Duration::from_millis(150))
        .ping_timeout(Duration::from_millis(100));
    let client = new_client(config);

    client.connect(&broker.url()).await.unwrap();
    wait_connected(&client).await;

    broker
        .push(creation_message(&[0x01], "tracker", b"x"))
        .await
        .unwrap();
    let watermark = client.get_state().await.unwrap().watermark.unwrap();

    broker.drop_pings_on_first_conn();

    {
        let broker_count = {
            let inner = broker.inner.clone();
            move || inner.conn_count.load(Ordering::SeqCst) >= 2
        };
        wait_for("ping timeout to force a reconnect", broker_count).await;
    }
    wait_connected(&client).await;

    let syncs = broker.sync_requests();
    assert!(syncs.len() >= 2);
    assert_eq!(syncs[0], None);
    assert_eq!(syncs[1], Some(watermark));
}

// Invariant 7: after shutdown no callbacks fire, no RPCs go out, and a
// second shutdown is a no-op.
#[tokio::test]
async fn test_shutdown_is_clean_and_idempotent() {
    init_tracing();
    let broker = Broker::start(uid()).await;
    let client = new_client(fast_config());
    let handler = Arc::new(RecordingHandler::default());
    client.push_handler(handler.clone()).await;

    client.connect(&broker.url()).await.unwrap();
    wait_connected(&client).await;

    client.shutdown();
    client.shutdown();

    {
        let client = client.clone();
        wait_for("connection teardown", move || !client.is_connected()).await;
    }

    // Pushing now gets no reply: the pipeline is gone.
    let reply = broker
        .push(creation_message(&[0x05], "tracker", b"late"))
        .await;
    assert!(reply.is_none() || reply.map(|r| r.kind) == Some(WireKind::Error));
    assert!(handler.creates.lock().unwrap().is_empty());

    let err = client.inject_item("cat", b"x").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Disconnected | ClientError::ShuttingDown
    ));
}

// A handler registered while connected immediately replays current
// state.
#[tokio::test]
async fn test_late_handler_registration_replays_state() {
    init_tracing();
    let broker = Broker::start(uid()).await;
    let client = new_client(fast_config());

    client.connect(&broker.url()).await.unwrap();
    wait_connected(&client).await;

    broker
        .push(creation_message(&[0x01], "tracker", b"x"))
        .await
        .unwrap();

    let late = Arc::new(RecordingHandler::default());
    client.push_handler(late.clone()).await;

    let creates = late.creates.lock().unwrap();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].msg_id.as_bytes(), &[0x01]);
}
