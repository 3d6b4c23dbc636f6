//! One actor per observed [`BucketKey`]: the
//! in-memory `{seq, date}` cursor plus the single-slot "needs-fetch" flag
//! that collapses concurrent `fetch_new_updates` calls into at most one
//! follow-up loop, instead of locks.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use rc_config::{ApplySource, ApplyUpdates, BucketRecord, SyncConfig, SyncStorage, BUCKET_FETCH_PAGE_SIZE, MAX_TOTAL_UPDATES};
use rc_session::ProtocolSession;
use rc_wire::{BucketKey, GetUpdatesInput, GetUpdatesOutput, Update};
use tracing::warn;

use crate::stats::SyncStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub key: BucketKey,
    pub seq: i64,
    pub date: i64,
    pub is_fetching: bool,
    pub needs_fetch: bool,
}

pub struct BucketActor {
    key: BucketKey,
    seq: AtomicI64,
    date: AtomicI64,
    is_fetching: AtomicBool,
    needs_fetch: AtomicBool,
}

impl BucketActor {
    pub fn new(key: BucketKey, initial: BucketRecord) -> Self {
        Self {
            key,
            seq: AtomicI64::new(initial.seq),
            date: AtomicI64::new(initial.date),
            is_fetching: AtomicBool::new(false),
            needs_fetch: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> BucketKey {
        self.key
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            key: self.key,
            seq: self.seq.load(Ordering::Acquire),
            date: self.date.load(Ordering::Acquire),
            is_fetching: self.is_fetching.load(Ordering::Acquire),
            needs_fetch: self.needs_fetch.load(Ordering::Acquire),
        }
    }

    /// Advance the in-memory cursor on a direct apply. A plain max is
    /// enough: only seq-monotonicity is required, and the fetch loop's
    /// own duplicate filter tolerates a cursor that lags behind briefly.
    pub fn update_state(&self, seq: i64, date: i64) {
        self.seq.fetch_max(seq, Ordering::AcqRel);
        self.date.fetch_max(date, Ordering::AcqRel);
    }

    fn is_cold_start(&self) -> bool {
        self.seq.load(Ordering::Acquire) == 0 || self.date.load(Ordering::Acquire) == 0
    }

    /// `fetchNewUpdates()`: if a loop is already running, flag a follow-up
    /// and return without issuing a second RPC; otherwise run the loop,
    /// then run it again if a follow-up was flagged while it ran. Returns
    /// the greatest applied date, or 0 if nothing was applied across every
    /// iteration.
    pub async fn fetch_new_updates(
        &self,
        session: &Arc<ProtocolSession>,
        storage: &Arc<dyn SyncStorage>,
        apply: &Arc<dyn ApplyUpdates>,
        config: &SyncConfig,
        stats: &Arc<SyncStats>,
    ) -> i64 {
        if self.is_fetching.swap(true, Ordering::AcqRel) {
            self.needs_fetch.store(true, Ordering::Release);
            return 0;
        }
        let mut max_applied_date = 0;
        loop {
            let applied = self.run_fetch_loop(session, storage, apply, config, stats).await;
            max_applied_date = max_applied_date.max(applied);
            if !self.needs_fetch.swap(false, Ordering::AcqRel) {
                break;
            }
            stats.follow_up();
        }
        self.is_fetching.store(false, Ordering::Release);
        max_applied_date
    }

    /// One full `getUpdates` paging loop.
    async fn run_fetch_loop(
        &self,
        session: &Arc<ProtocolSession>,
        storage: &Arc<dyn SyncStorage>,
        apply: &Arc<dyn ApplyUpdates>,
        config: &SyncConfig,
        stats: &Arc<SyncStats>,
    ) -> i64 {
        stats.fetch_started();
        let start_seq = self.seq.load(Ordering::Acquire);
        let cold_start = self.is_cold_start();
        let mut current_seq = start_seq;
        let mut final_date = self.date.load(Ordering::Acquire);
        let mut seq_end: Option<i64> = None;
        let mut pending: Vec<Update> = Vec::new();

        loop {
            let mut input = GetUpdatesInput::new(self.key, current_seq).with_total_limit(BUCKET_FETCH_PAGE_SIZE);
            if let Some(end) = seq_end {
                input = input.with_seq_end(end);
            }
            let value = match session
                .call_rpc("getUpdates", serde_json::to_value(&input).expect("GetUpdatesInput always serializes"), None)
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    warn!(bucket = %self.key, error = %e, "getUpdates rpc failed, abandoning fetch loop");
                    stats.fetch_failed();
                    return 0;
                }
            };
            let output: GetUpdatesOutput = match serde_json::from_value(value) {
                Ok(o) => o,
                Err(e) => {
                    warn!(bucket = %self.key, error = %e, "malformed getUpdates result, abandoning fetch loop");
                    stats.fetch_failed();
                    return 0;
                }
            };

            if output.is_too_long() {
                stats.too_long();
                let gap = output.seq - current_seq;
                if cold_start || gap > MAX_TOTAL_UPDATES {
                    if !cold_start {
                        warn!(bucket = %self.key, gap, "update gap too large, fast-forwarding and recommending a cache clear");
                    }
                    current_seq = output.seq;
                    final_date = output.date;
                    pending.clear();
                    break;
                }
                seq_end = Some(output.seq);
                continue;
            }

            if output.seq < current_seq {
                warn!(bucket = %self.key, reported = output.seq, current_seq, "getUpdates went backwards, aborting fetch loop");
                break;
            }

            for update in output.updates {
                let update_seq = update.seq.map(i64::from).unwrap_or(0);
                if update_seq <= start_seq {
                    stats.duplicate();
                    continue;
                }
                if !update.kind.in_catchup_whitelist(config.enable_message_updates) {
                    stats.skipped();
                    continue;
                }
                pending.push(update);
            }

            current_seq = output.seq;
            final_date = output.date;
            if output.is_final {
                break;
            }
        }

        if pending.is_empty() {
            self.seq.store(current_seq, Ordering::Release);
            self.date.store(final_date, Ordering::Release);
            return 0;
        }

        pending.sort_by_key(|u| u.seq.unwrap_or(0));
        if let Err(e) = apply.apply(&pending, ApplySource::SyncCatchup).await {
            warn!(bucket = %self.key, error = %e, "apply failed for bucket catch-up batch, cursor not advanced");
            return 0;
        }
        stats.bucket_applied(pending.len() as u64);

        self.seq.store(current_seq, Ordering::Release);
        self.date.store(final_date, Ordering::Release);
        if let Err(e) = storage
            .set_bucket_state(self.key, BucketRecord { seq: current_seq, date: final_date })
            .await
        {
            warn!(bucket = %self.key, error = %e, "failed to persist bucket cursor");
        }
        final_date
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use pretty_assertions::assert_eq;

    use rc_config::ApplyError;
    use rc_session::{AuthEvent, AuthProvider};
    use rc_transport::DuplexTransport;
    use rc_wire::{ClientMessage, PeerId, ServerBody, ServerProtocolMessage, UpdateKind};
    use tokio::sync::mpsc;

    use super::*;

    struct StaticAuth;
    impl AuthProvider for StaticAuth {
        fn token(&self) -> Option<String> {
            Some("tok".into())
        }
        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AuthEvent> {
            let (_tx, rx) = tokio::sync::broadcast::channel(1);
            rx
        }
    }

    #[derive(Default)]
    struct FakeStorage {
        bucket_states: Mutex<std::collections::HashMap<BucketKey, BucketRecord>>,
    }

    #[async_trait::async_trait]
    impl SyncStorage for FakeStorage {
        async fn get_state(&self) -> Result<rc_config::SyncStateRecord, rc_config::StorageError> {
            Ok(rc_config::SyncStateRecord::default())
        }
        async fn set_state(&self, _state: rc_config::SyncStateRecord) -> Result<(), rc_config::StorageError> {
            Ok(())
        }
        async fn get_bucket_state(&self, key: BucketKey) -> Result<Option<BucketRecord>, rc_config::StorageError> {
            Ok(self.bucket_states.lock().unwrap().get(&key).copied())
        }
        async fn set_bucket_state(&self, key: BucketKey, state: BucketRecord) -> Result<(), rc_config::StorageError> {
            self.bucket_states.lock().unwrap().insert(key, state);
            Ok(())
        }
        async fn set_bucket_states(
            &self,
            states: std::collections::HashMap<BucketKey, BucketRecord>,
        ) -> Result<(), rc_config::StorageError> {
            self.bucket_states.lock().unwrap().extend(states);
            Ok(())
        }
        async fn clear_sync_state(&self) -> Result<(), rc_config::StorageError> {
            self.bucket_states.lock().unwrap().clear();
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeApply {
        applied: Mutex<Vec<Update>>,
    }

    #[async_trait::async_trait]
    impl ApplyUpdates for FakeApply {
        async fn apply(&self, updates: &[Update], _source: ApplySource) -> Result<(), ApplyError> {
            self.applied.lock().unwrap().extend(updates.iter().cloned());
            Ok(())
        }
    }

    async fn harness() -> (Arc<ProtocolSession>, tokio::io::DuplexStream) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (events_tx, events_rx) = mpsc::channel(64);
        let transport = Arc::new(DuplexTransport::new(client_io, events_tx));
        transport.connect().await;
        let session = Arc::new(ProtocolSession::new(transport, events_rx, Arc::new(StaticAuth), 1));
        (session, server_io)
    }

    fn member_update(seq: i32, date: i64, space_id: i64, user_id: i64) -> Update {
        Update {
            seq: Some(seq),
            date: Some(date),
            kind: UpdateKind::SpaceMemberAdd {
                space_id,
                member: serde_json::json!({"userId": user_id}),
            },
        }
    }

    fn rpc_call_input(msg: &ClientMessage) -> GetUpdatesInput {
        match &msg.body {
            rc_wire::ClientBody::RpcCall { input, .. } => serde_json::from_value(input.clone()).unwrap(),
            other => panic!("expected RpcCall, got {other:?}"),
        }
    }

    fn reaction_update(seq: i32, date: i64) -> Update {
        Update {
            seq: Some(seq),
            date: Some(date),
            kind: UpdateKind::UpdateReaction {
                chat_id: 1,
                message_id: 2,
                reaction: serde_json::Value::Null,
            },
        }
    }

    #[tokio::test]
    async fn cold_start_fetch_applies_whitelisted_updates_and_drops_non_whitelisted() {
        let (session, mut server_io) = harness().await;
        let storage: Arc<dyn SyncStorage> = Arc::new(FakeStorage::default());
        let apply = Arc::new(FakeApply::default());
        let apply_dyn: Arc<dyn ApplyUpdates> = apply.clone();
        let stats = Arc::new(SyncStats::default());
        let config = SyncConfig::default();

        let actor = Arc::new(BucketActor::new(BucketKey::space(7), BucketRecord::default()));
        let actor_for_task = actor.clone();
        let session_for_task = session.clone();
        let call = tokio::spawn(async move {
            actor_for_task
                .fetch_new_updates(&session_for_task, &storage, &apply_dyn, &config, &stats)
                .await
        });

        let req: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
        rc_wire::codec::send_message(
            &mut server_io,
            &ServerProtocolMessage::new(
                0,
                ServerBody::RpcResult {
                    req_msg_id: req.id,
                    result: serde_json::to_value(GetUpdatesOutput {
                        seq: 2,
                        date: 1_700_000_000,
                        is_final: true,
                        result_type: rc_wire::GetUpdatesResultType::Ok,
                        updates: vec![member_update(1, 1_699_999_999, 7, 9), reaction_update(2, 1_700_000_000)],
                    })
                    .unwrap(),
                },
            ),
        )
        .await
        .unwrap();

        let applied_date = call.await.unwrap();
        assert_eq!(applied_date, 1_700_000_000);
        assert_eq!(apply.applied.lock().unwrap().len(), 1);
        let snapshot = actor.snapshot();
        assert_eq!(snapshot.seq, 2);
        assert_eq!(snapshot.date, 1_700_000_000);
    }

    #[tokio::test]
    async fn too_long_slices_and_continues_until_final() {
        let (session, mut server_io) = harness().await;
        let storage: Arc<dyn SyncStorage> = Arc::new(FakeStorage::default());
        let apply = Arc::new(FakeApply::default());
        let apply_dyn: Arc<dyn ApplyUpdates> = apply.clone();
        let stats = Arc::new(SyncStats::default());
        let config = SyncConfig::default();

        let actor = Arc::new(BucketActor::new(BucketKey::chat(PeerId::User(9)), BucketRecord { seq: 100, date: 1 }));
        let actor_for_task = actor.clone();
        let session_for_task = session.clone();
        let call = tokio::spawn(async move {
            actor_for_task
                .fetch_new_updates(&session_for_task, &storage, &apply_dyn, &config, &stats)
                .await
        });

        let first: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
        let first_input = rpc_call_input(&first);
        assert_eq!(first_input.start_seq, 100);
        assert!(first_input.seq_end.is_none());
        rc_wire::codec::send_message(
            &mut server_io,
            &ServerProtocolMessage::new(
                0,
                ServerBody::RpcResult {
                    req_msg_id: first.id,
                    result: serde_json::to_value(GetUpdatesOutput {
                        seq: 250,
                        date: 0,
                        is_final: false,
                        result_type: rc_wire::GetUpdatesResultType::TooLong,
                        updates: vec![],
                    })
                    .unwrap(),
                },
            ),
        )
        .await
        .unwrap();

        let second: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
        let second_input = rpc_call_input(&second);
        assert_eq!(second_input.seq_end, Some(250));
        rc_wire::codec::send_message(
            &mut server_io,
            &ServerProtocolMessage::new(
                0,
                ServerBody::RpcResult {
                    req_msg_id: second.id,
                    result: serde_json::to_value(GetUpdatesOutput {
                        seq: 250,
                        date: 42,
                        is_final: true,
                        result_type: rc_wire::GetUpdatesResultType::Ok,
                        updates: vec![member_update(150, 42, 3, 1)],
                    })
                    .unwrap(),
                },
            ),
        )
        .await
        .unwrap();

        let applied_date = call.await.unwrap();
        assert_eq!(applied_date, 42);
        assert_eq!(actor.snapshot().seq, 250);
    }

    #[tokio::test]
    async fn concurrent_fetch_calls_collapse_into_one_follow_up() {
        let (session, mut server_io) = harness().await;
        let storage: Arc<dyn SyncStorage> = Arc::new(FakeStorage::default());
        let apply = Arc::new(FakeApply::default());
        let apply_dyn: Arc<dyn ApplyUpdates> = apply.clone();
        let stats = Arc::new(SyncStats::default());
        let config = SyncConfig::default();

        let actor = Arc::new(BucketActor::new(BucketKey::chat(PeerId::User(3)), BucketRecord { seq: 10, date: 5 }));

        let first_call = {
            let actor = actor.clone();
            let session = session.clone();
            let storage = storage.clone();
            let apply_dyn = apply_dyn.clone();
            let stats = stats.clone();
            let config = config;
            tokio::spawn(async move { actor.fetch_new_updates(&session, &storage, &apply_dyn, &config, &stats).await })
        };

        let first: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();

        // A second call arrives while the first is still in flight: it must
        // dedup rather than issue its own RPC (scenario 3).
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        actor.fetch_new_updates(&session, &storage, &apply_dyn, &config, &stats).await;
        assert!(actor.snapshot().needs_fetch);

        rc_wire::codec::send_message(
            &mut server_io,
            &ServerProtocolMessage::new(
                0,
                ServerBody::RpcResult {
                    req_msg_id: first.id,
                    result: serde_json::to_value(GetUpdatesOutput {
                        seq: 10,
                        date: 5,
                        is_final: true,
                        result_type: rc_wire::GetUpdatesResultType::Ok,
                        updates: vec![],
                    })
                    .unwrap(),
                },
            ),
        )
        .await
        .unwrap();

        // A single follow-up loop runs after the first ends.
        let second: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
        rc_wire::codec::send_message(
            &mut server_io,
            &ServerProtocolMessage::new(
                0,
                ServerBody::RpcResult {
                    req_msg_id: second.id,
                    result: serde_json::to_value(GetUpdatesOutput {
                        seq: 10,
                        date: 5,
                        is_final: true,
                        result_type: rc_wire::GetUpdatesResultType::Ok,
                        updates: vec![],
                    })
                    .unwrap(),
                },
            ),
        )
        .await
        .unwrap();

        first_call.await.unwrap();
        assert!(!actor.snapshot().is_fetching);
        assert!(!actor.snapshot().needs_fetch);
        assert_eq!(stats.snapshot().follow_ups, 1);
    }
}
