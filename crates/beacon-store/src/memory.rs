//! In-memory store for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use beacon_core::Uid;

use crate::error::StoreResult;
use crate::store::LocalStore;

/// `LocalStore` backed by a plain map. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, uid: &Uid) -> StoreResult<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().expect("store mutex poisoned");
        Ok(blobs.get(&uid.to_hex()).cloned())
    }

    async fn put(&self, uid: &Uid, bytes: &[u8]) -> StoreResult<()> {
        let mut blobs = self.blobs.lock().expect("store mutex poisoned");
        blobs.insert(uid.to_hex(), bytes.to_vec());
        Ok(())
    }
}
