//! The `LocalStore` trait.

use async_trait::async_trait;
use beacon_core::Uid;

use crate::error::StoreResult;

/// Keyed byte store for serialized state machines.
///
/// Keys are user IDs; values are opaque blobs produced by
/// `StateMachine::to_bytes`. Implementations must tolerate concurrent
/// access from the save-interval task and the connect path.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Loads the blob for a user, or `None` if nothing was saved yet.
    async fn get(&self, uid: &Uid) -> StoreResult<Option<Vec<u8>>>;

    /// Stores (or replaces) the blob for a user.
    async fn put(&self, uid: &Uid, bytes: &[u8]) -> StoreResult<()>;
}
