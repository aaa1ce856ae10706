//! # RPC Layer
//!
//! Request/response correlation over the duplex WebSocket, plus the
//! per-call deadline wrapper.
//!
//! ## Call Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RPC Correlation                                 │
//! │                                                                         │
//! │  caller           RpcClient             transport            broker     │
//! │    │                  │                     │                   │       │
//! │    │  call(kind, p)   │                     │                   │       │
//! │    │─────────────────►│  register waiter    │                   │       │
//! │    │                  │  keyed by msg id    │                   │       │
//! │    │                  │────────────────────►│  frame            │       │
//! │    │                  │                     │──────────────────►│       │
//! │    │   (await)        │                     │  response frame   │       │
//! │    │                  │   complete(msg id)  │◄──────────────────│       │
//! │    │◄─────────────────│◄────────────────────│                   │       │
//! │                                                                         │
//! │  Disconnect drops every registered waiter, failing pending calls       │
//! │  with `Disconnected`. The same waiter map coalesces concurrent         │
//! │  triggers of the one in-flight Sync.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use beacon_core::Message;

use crate::error::{ClientError, ClientResult};
use crate::protocol::{
    make_auth, make_consume, make_ping, make_sync, AuthOkPayload, SyncOkPayload, WireKind,
    WireMessage,
};

// =============================================================================
// RpcClient
// =============================================================================

/// Handle for issuing calls over one live connection.
///
/// Cheap to clone; all clones share the outgoing queue and the pending
/// waiter map. A handle outliving its connection fails calls with
/// `Disconnected`.
#[derive(Clone)]
pub struct RpcClient {
    outgoing_tx: mpsc::Sender<WireMessage>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<WireMessage>>>>,
}

impl RpcClient {
    pub(crate) fn new(outgoing_tx: mpsc::Sender<WireMessage>) -> Self {
        RpcClient {
            outgoing_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Sends a request and awaits its correlated response. No deadline of
    /// its own; see [`TimeoutRpc`].
    pub async fn call(&self, request: WireMessage) -> ClientResult<WireMessage> {
        let id = request
            .message_id
            .clone()
            .ok_or_else(|| ClientError::InvalidMessage("request without message_id".into()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending mutex poisoned");
            pending.insert(id.clone(), tx);
        }

        if self.outgoing_tx.send(request).await.is_err() {
            self.forget(&id);
            return Err(ClientError::Disconnected);
        }

        match rx.await {
            Ok(response) => response.into_result(),
            // The transport dropped our waiter: connection is gone.
            Err(_) => Err(ClientError::Disconnected),
        }
    }

    /// Sends a fire-and-forget frame (acks, error replies).
    pub async fn notify(&self, frame: WireMessage) -> ClientResult<()> {
        self.outgoing_tx
            .send(frame)
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    /// Routes a response frame to its waiter. Returns false when nothing
    /// was waiting (stale or unsolicited response).
    pub(crate) fn complete(&self, response: WireMessage) -> bool {
        let Some(id) = response.message_id.clone() else {
            return false;
        };
        let waiter = {
            let mut pending = self.pending.lock().expect("pending mutex poisoned");
            pending.remove(&id)
        };
        match waiter {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!(message_id = %id, "caller gave up before response arrived");
                }
                true
            }
            None => false,
        }
    }

    /// Drops every registered waiter; their calls fail with
    /// `Disconnected`.
    pub(crate) fn fail_pending(&self) {
        let mut pending = self.pending.lock().expect("pending mutex poisoned");
        let count = pending.len();
        if count > 0 {
            warn!(count, "failing pending calls on disconnect");
        }
        pending.clear();
    }

    fn forget(&self, id: &str) {
        let mut pending = self.pending.lock().expect("pending mutex poisoned");
        pending.remove(id);
    }
}

// =============================================================================
// TimeoutRpc
// =============================================================================

/// Per-call deadline wrapper. Every call and notification acquires a
/// deadline equal to the configured request timeout; elapse maps to the
/// distinguished [`ClientError::Timeout`] so callers can tell timeout
/// from remote failure.
#[derive(Clone)]
pub struct TimeoutRpc {
    inner: RpcClient,
    timeout: Duration,
}

impl TimeoutRpc {
    pub fn new(inner: RpcClient, timeout: Duration) -> Self {
        TimeoutRpc { inner, timeout }
    }

    /// The wrapped handle, for callers that manage their own deadline.
    pub fn inner(&self) -> &RpcClient {
        &self.inner
    }

    async fn call_with_deadline(
        &self,
        request: WireMessage,
        deadline: Duration,
    ) -> ClientResult<WireMessage> {
        match tokio::time::timeout(deadline, self.inner.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn call(&self, request: WireMessage) -> ClientResult<WireMessage> {
        self.call_with_deadline(request, self.timeout).await
    }

    /// Fire-and-forget frame under the same deadline.
    pub async fn notify(&self, frame: WireMessage) -> ClientResult<()> {
        match tokio::time::timeout(self.timeout, self.inner.notify(frame)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    // =========================================================================
    // Typed Calls
    // =========================================================================

    /// `Authenticate(token) -> { uid, session_id }`.
    pub async fn authenticate(&self, token: &str) -> ClientResult<AuthOkPayload> {
        let response = self.call(make_auth(token)?).await?;
        expect_kind(&response, WireKind::AuthOk)?;
        response.extract_payload()
    }

    /// `Sync(since) -> messages`.
    pub async fn sync(&self, since: Option<DateTime<Utc>>) -> ClientResult<Vec<Message>> {
        let response = self.call(make_sync(since)?).await?;
        expect_kind(&response, WireKind::SyncOk)?;
        let payload: SyncOkPayload = response.extract_payload()?;
        Ok(payload.messages)
    }

    /// `ConsumeMessage(msg)` — the write path.
    pub async fn consume_message(&self, message: Message) -> ClientResult<()> {
        let response = self.call(make_consume(message)?).await?;
        expect_kind(&response, WireKind::ConsumeOk)?;
        Ok(())
    }

    /// `Ping()` with an explicit deadline; the ping loop passes its own
    /// (shorter) timeout.
    pub async fn ping(&self, deadline: Duration) -> ClientResult<()> {
        let response = self
            .call_with_deadline(make_ping()?, deadline)
            .await?;
        expect_kind(&response, WireKind::Pong)?;
        Ok(())
    }
}

fn expect_kind(msg: &WireMessage, expected: WireKind) -> ClientResult<()> {
    if msg.kind != expected {
        return Err(ClientError::InvalidMessage(format!(
            "expected {:?} response, got {:?}",
            expected, msg.kind
        )));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
