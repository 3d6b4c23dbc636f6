//! Persistence records and the two collaborator trait contracts the core
//! requires from the host application's local store.

use serde::{Deserialize, Serialize};

use rc_wire::{BucketKey, BucketState, Update};

/// One row per `(bucketType, entityId)` carrying `(seq, date)`.
pub type BucketRecord = BucketState;

/// The single KV-style record carrying the catch-up horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStateRecord {
    pub last_sync_date: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistence the sync engine needs: bucket cursors and the global sync
/// cursor.
#[async_trait::async_trait]
pub trait SyncStorage: Send + Sync {
    async fn get_state(&self) -> Result<SyncStateRecord, StorageError>;
    async fn set_state(&self, state: SyncStateRecord) -> Result<(), StorageError>;
    async fn get_bucket_state(&self, key: BucketKey) -> Result<Option<BucketRecord>, StorageError>;
    async fn set_bucket_state(&self, key: BucketKey, state: BucketRecord) -> Result<(), StorageError>;
    async fn set_bucket_states(
        &self,
        states: std::collections::HashMap<BucketKey, BucketRecord>,
    ) -> Result<(), StorageError>;
    async fn clear_sync_state(&self) -> Result<(), StorageError>;
}

/// Where a batch of updates being applied came from — the local store may
/// treat realtime pushes and catch-up batches differently (e.g. for undo
/// semantics), even though application is idempotent either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplySource {
    Realtime,
    SyncCatchup,
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("local store apply failed: {0}")]
    Store(String),
}

/// Idempotent local-store application of pushed/caught-up updates.
#[async_trait::async_trait]
pub trait ApplyUpdates: Send + Sync {
    async fn apply(&self, updates: &[Update], source: ApplySource) -> Result<(), ApplyError>;
}
