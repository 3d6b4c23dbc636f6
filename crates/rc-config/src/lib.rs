//! Configuration and persistence layer for the realtime client core,
//! plus the collaborator trait contracts the core requires from
//! the host application's local store.

pub mod error;
pub mod loader;
pub mod policy;
pub mod storage;
pub mod sync_config;

pub use error::ConfigError;
pub use loader::{load_sync_config, load_sync_config_from, ConfigSources};
pub use policy::{default_backoff, ConnectionPolicy};
pub use storage::{ApplyError, ApplySource, ApplyUpdates, BucketRecord, StorageError, SyncStorage, SyncStateRecord};
pub use sync_config::{
    SyncConfig, BUCKET_FETCH_PAGE_SIZE, COLD_START_LOOKBACK_SECONDS, MAX_TOTAL_UPDATES, STALE_SYNC_THRESHOLD_SECONDS,
};
