//! `SyncEngine`: owns the per-bucket actor registry, applies direct
//! pushes, and drives the on-connect catch-up sequence.
//!
//! The registry is the same `RwLock<HashMap<..>>` shape as `ClientTracker`
//! (`hootenanny::zmq::client_tracker`), generalized from byte identities
//! and passive records to bucket keys and actors with their own
//! coalescing-fetch state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rc_config::{
    ApplySource, ApplyUpdates, SyncConfig, SyncStateRecord, SyncStorage, COLD_START_LOOKBACK_SECONDS,
    STALE_SYNC_THRESHOLD_SECONDS,
};
use rc_session::{ProtocolSession, SessionEvent};
use rc_wire::{BucketKey, Update};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::warn;

use crate::bucket_actor::{BucketActor, BucketSnapshot};
use crate::stats::{StatsSnapshot, SyncStats};

pub struct SyncEngine {
    session: Arc<ProtocolSession>,
    storage: Arc<dyn SyncStorage>,
    apply: Arc<dyn ApplyUpdates>,
    config: SyncConfig,
    stats: Arc<SyncStats>,
    buckets: RwLock<HashMap<BucketKey, Arc<BucketActor>>>,
    last_sync_date: Mutex<i64>,
}

impl SyncEngine {
    pub fn new(
        session: Arc<ProtocolSession>,
        storage: Arc<dyn SyncStorage>,
        apply: Arc<dyn ApplyUpdates>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            storage,
            apply,
            config,
            stats: Arc::new(SyncStats::default()),
            buckets: RwLock::new(HashMap::new()),
            last_sync_date: Mutex::new(0),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn bucket_snapshot(&self, key: BucketKey) -> Option<BucketSnapshot> {
        self.buckets.read().await.get(&key).map(|actor| actor.snapshot())
    }

    pub async fn bucket_snapshots(&self) -> Vec<BucketSnapshot> {
        self.buckets.read().await.values().map(|actor| actor.snapshot()).collect()
    }

    /// Drive the engine for the process lifetime: apply direct pushes,
    /// trigger per-bucket catch-up from notifications, and run the
    /// on-connect sequence whenever `connection_open` flips to `true`.
    /// Decoupled from `rc-connect` the same way `rc-txqueue` is — the
    /// caller derives this boolean from `ConnectionManager`'s snapshot
    /// stream.
    pub async fn run(
        self: Arc<Self>,
        mut session_events: broadcast::Receiver<SessionEvent>,
        mut connection_open: watch::Receiver<bool>,
    ) {
        if let Ok(record) = self.storage.get_state().await {
            *self.last_sync_date.lock().await = record.last_sync_date;
        }
        let mut connection_is_open = *connection_open.borrow();
        if connection_is_open {
            self.clone().on_connect();
        }

        loop {
            tokio::select! {
                event = session_events.recv() => {
                    match event {
                        Ok(SessionEvent::Updates(updates)) => self.clone().handle_updates(updates).await,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "sync engine lagged behind session events");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
                changed = connection_open.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let now_open = *connection_open.borrow();
                    if now_open && !connection_is_open {
                        connection_is_open = true;
                        self.clone().on_connect();
                    } else if !now_open {
                        connection_is_open = false;
                    }
                }
            }
        }
    }

    async fn handle_updates(self: Arc<Self>, updates: Vec<Update>) {
        for update in updates {
            let Some(key) = update.bucket_key() else { continue };
            if update.is_notification() {
                self.clone().spawn_bucket_fetch(key);
                continue;
            }
            let seq = update.seq.map(i64::from).unwrap_or(0);
            let date = update.date.unwrap_or(0);

            let actor = self.bucket(key).await;
            if seq > 0 && seq <= actor.snapshot().seq {
                self.stats.duplicate();
                continue;
            }

            if let Err(e) = self.apply.apply(std::slice::from_ref(&update), ApplySource::Realtime).await {
                warn!(bucket = %key, error = %e, "apply failed for a direct update, local store left unchanged");
                continue;
            }
            self.stats.direct_applied(1);
            actor.update_state(seq, date);
            if date > 0 {
                self.advance_last_sync_date(date).await;
            }
        }
    }

    /// (a) enqueue a user-bucket fetch, (b) call `getUpdatesState` with the
    /// global cursor, seeded or reset first if stale.
    fn on_connect(self: Arc<Self>) {
        tokio::spawn(async move {
            let now = current_unix_time();
            let date = {
                let mut last_sync_date = self.last_sync_date.lock().await;
                if *last_sync_date == 0 {
                    *last_sync_date = now - COLD_START_LOOKBACK_SECONDS;
                } else if now - *last_sync_date > STALE_SYNC_THRESHOLD_SECONDS {
                    *last_sync_date = now;
                }
                *last_sync_date
            };

            self.clone().spawn_bucket_fetch(BucketKey::User);

            if let Err(e) = self.session.call_rpc("getUpdatesState", serde_json::json!({ "date": date }), None).await {
                warn!(error = %e, "getUpdatesState rpc failed");
            }
        });
    }

    fn spawn_bucket_fetch(self: Arc<Self>, key: BucketKey) {
        tokio::spawn(async move {
            let actor = self.bucket(key).await;
            let applied_date = actor
                .fetch_new_updates(&self.session, &self.storage, &self.apply, &self.config, &self.stats)
                .await;
            if applied_date > 0 {
                self.advance_last_sync_date(applied_date).await;
            }
        });
    }

    /// `lastSyncDate ← max(lastSyncDate, maxAppliedDate − safetyGap)`,
    /// never decreasing.
    async fn advance_last_sync_date(&self, max_applied_date: i64) {
        let candidate = (max_applied_date - self.config.last_sync_safety_gap_seconds).max(0);
        let mut last_sync_date = self.last_sync_date.lock().await;
        if candidate > *last_sync_date {
            *last_sync_date = candidate;
            if let Err(e) = self.storage.set_state(SyncStateRecord { last_sync_date: candidate }).await {
                warn!(error = %e, "failed to persist lastSyncDate");
            }
        }
    }

    async fn bucket(&self, key: BucketKey) -> Arc<BucketActor> {
        if let Some(actor) = self.buckets.read().await.get(&key) {
            return actor.clone();
        }
        let mut buckets = self.buckets.write().await;
        if let Some(actor) = buckets.get(&key) {
            return actor.clone();
        }
        let initial = self.storage.get_bucket_state(key).await.ok().flatten().unwrap_or_default();
        let actor = Arc::new(BucketActor::new(key, initial));
        buckets.insert(key, actor.clone());
        actor
    }
}

fn current_unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs() as i64
}
