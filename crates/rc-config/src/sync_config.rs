//! `SyncConfig` — runtime-adjustable knobs for the sync engine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether message/edit/attachment updates are included in bucket
    /// catch-up rather than dropped.
    pub enable_message_updates: bool,
    /// Seconds subtracted from `maxAppliedDate` when advancing
    /// `lastSyncDate`.
    pub last_sync_safety_gap_seconds: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enable_message_updates: false,
            last_sync_safety_gap_seconds: 15,
        }
    }
}

/// Gap threshold (§4.4 step 1): a `TOO_LONG` response is fast-forwarded
/// rather than sliced once the reported gap exceeds this many updates.
pub const MAX_TOTAL_UPDATES: i64 = 1000;
/// Per-request page size (`totalLimit`) a bucket fetch asks the server
/// for — distinct from `MAX_TOTAL_UPDATES`, which only bounds the gap a
/// `TOO_LONG` response is allowed to report before fast-forwarding.
pub const BUCKET_FETCH_PAGE_SIZE: i32 = 50;
pub const COLD_START_LOOKBACK_SECONDS: i64 = 5 * 24 * 60 * 60;
pub const STALE_SYNC_THRESHOLD_SECONDS: i64 = 14 * 24 * 60 * 60;
