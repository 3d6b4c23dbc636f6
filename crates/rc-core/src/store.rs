//! In-memory reference implementations of the `SyncStorage`/`ApplyUpdates`
//! collaborator contracts, for tests and small embeddings that don't
//! bring their own local database.

use std::collections::HashMap;

use rc_config::{ApplyError, ApplySource, ApplyUpdates, BucketRecord, StorageError, SyncStateRecord, SyncStorage};
use rc_wire::{BucketKey, Update};
use tokio::sync::Mutex;

/// Keeps bucket cursors and the global sync cursor in a plain `HashMap`
/// behind a `tokio::sync::Mutex` — adequate for tests; a real embedding
/// backs `SyncStorage` with its own database.
#[derive(Debug, Default)]
pub struct InMemorySyncStorage {
    state: Mutex<SyncStateRecord>,
    buckets: Mutex<HashMap<BucketKey, BucketRecord>>,
}

impl InMemorySyncStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SyncStorage for InMemorySyncStorage {
    async fn get_state(&self) -> Result<SyncStateRecord, StorageError> {
        Ok(*self.state.lock().await)
    }

    async fn set_state(&self, state: SyncStateRecord) -> Result<(), StorageError> {
        *self.state.lock().await = state;
        Ok(())
    }

    async fn get_bucket_state(&self, key: BucketKey) -> Result<Option<BucketRecord>, StorageError> {
        Ok(self.buckets.lock().await.get(&key).copied())
    }

    async fn set_bucket_state(&self, key: BucketKey, state: BucketRecord) -> Result<(), StorageError> {
        self.buckets.lock().await.insert(key, state);
        Ok(())
    }

    async fn set_bucket_states(&self, states: HashMap<BucketKey, BucketRecord>) -> Result<(), StorageError> {
        self.buckets.lock().await.extend(states);
        Ok(())
    }

    async fn clear_sync_state(&self) -> Result<(), StorageError> {
        *self.state.lock().await = SyncStateRecord::default();
        self.buckets.lock().await.clear();
        Ok(())
    }
}

/// Appends every applied update to an in-memory log, tagged with the
/// source it came from. Real embeddings apply updates to their own
/// message/chat/space tables instead.
#[derive(Debug, Default)]
pub struct InMemoryApplyLog {
    applied: Mutex<Vec<(ApplySource, Update)>>,
}

impl InMemoryApplyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.applied.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.applied.lock().await.is_empty()
    }

    pub async fn entries(&self) -> Vec<(ApplySource, Update)> {
        self.applied.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ApplyUpdates for InMemoryApplyLog {
    async fn apply(&self, updates: &[Update], source: ApplySource) -> Result<(), ApplyError> {
        let mut applied = self.applied.lock().await;
        applied.extend(updates.iter().cloned().map(|u| (source, u)));
        Ok(())
    }
}
