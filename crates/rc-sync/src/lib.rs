//! Sync engine: keeps the local store consistent with the server by
//! applying direct pushes immediately and running per-bucket catch-up
//! fetches for `*HasNewUpdates` notifications.

mod bucket_actor;
mod engine;
mod stats;

pub use bucket_actor::{BucketActor, BucketSnapshot};
pub use engine::SyncEngine;
pub use stats::{StatsSnapshot, SyncStats};
