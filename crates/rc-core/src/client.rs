//! `RealtimeClient<S>`: wires the connection manager, protocol session,
//! transaction engine, and sync engine into one handle.

use std::sync::Arc;

use rc_config::{ApplyUpdates, ConnectionPolicy, SyncConfig, SyncStorage};
use rc_connect::{ConnectError, ConnectionManager, ConnectionState, Snapshot};
use rc_session::{AuthProvider, ProtocolSession};
use rc_sync::{BucketSnapshot, StatsSnapshot, SyncEngine};
use rc_transport::{Transport, TransportEvent};
use rc_txqueue::{Transaction, TransactionEngine, TxError};
use rc_wire::BucketKey;
use tokio::sync::{mpsc, watch};

pub struct RealtimeClient<S> {
    connection: Arc<ConnectionManager>,
    sync: Arc<SyncEngine>,
    transactions: TransactionEngine<S>,
}

impl<S: Clone + Send + Sync + 'static> RealtimeClient<S> {
    /// `transport`/`transport_events` are the pair a caller already built
    /// to construct a concrete [`Transport`] (its event sender half was
    /// handed to the transport at construction, e.g. `TcpTransport::new`).
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        auth: Arc<dyn AuthProvider>,
        build_number: u32,
        policy: ConnectionPolicy,
        sync_config: SyncConfig,
        storage: Arc<dyn SyncStorage>,
        apply: Arc<dyn ApplyUpdates>,
        store: S,
    ) -> Arc<Self> {
        let session = Arc::new(ProtocolSession::new(transport, transport_events, auth, build_number));
        let connection = Arc::new(ConnectionManager::new(session.clone(), policy));

        let sync = SyncEngine::new(session.clone(), storage, apply, sync_config);
        tokio::spawn(sync.clone().run(connection.subscribe_session_events(), connection_open_signal(&connection)));

        let transactions = TransactionEngine::new(
            store,
            session,
            connection.subscribe_session_events(),
            connection_open_signal(&connection),
        );

        Arc::new(Self { connection, sync, transactions })
    }

    pub fn start(&self) -> Result<(), ConnectError> {
        self.connection.start()
    }

    pub fn stop(&self) -> Result<(), ConnectError> {
        self.connection.stop()
    }

    pub fn connect_now(&self) -> Result<(), ConnectError> {
        self.connection.connect_now()
    }

    pub fn set_auth_available(&self, available: bool) -> Result<(), ConnectError> {
        self.connection.set_auth_available(available)
    }

    pub fn set_network_available(&self, available: bool) -> Result<(), ConnectError> {
        self.connection.set_network_available(available)
    }

    pub fn set_app_active(&self, active: bool) -> Result<(), ConnectError> {
        self.connection.set_app_active(active)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.connection.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.connection.subscribe()
    }

    pub async fn send(&self, transaction: Transaction<S>) -> Result<serde_json::Value, TxError> {
        self.transactions.send(transaction).await
    }

    pub fn sync_stats(&self) -> StatsSnapshot {
        self.sync.stats()
    }

    pub async fn bucket_snapshot(&self, key: BucketKey) -> Option<BucketSnapshot> {
        self.sync.bucket_snapshot(key).await
    }

    pub async fn bucket_snapshots(&self) -> Vec<BucketSnapshot> {
        self.sync.bucket_snapshots().await
    }
}

/// Adapts the connection manager's `Snapshot` stream into the plain
/// `open`/`not-open` boolean the transaction and sync engines key their
/// reconnect handling on, keeping both decoupled from `rc-connect`.
fn connection_open_signal(connection: &Arc<ConnectionManager>) -> watch::Receiver<bool> {
    let mut snapshots = connection.subscribe();
    let (open_tx, open_rx) = watch::channel(snapshots.borrow().state == ConnectionState::Open);
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let is_open = snapshots.borrow().state == ConnectionState::Open;
            if open_tx.send(is_open).is_err() {
                return;
            }
        }
    });
    open_rx
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use pretty_assertions::assert_eq;

    use rc_session::AuthEvent;
    use rc_transport::DuplexTransport;
    use rc_wire::{ClientMessage, GetUpdatesOutput, GetUpdatesResultType, PeerId, ServerBody, ServerProtocolMessage, UpdateKind};
    use tokio::sync::broadcast;

    use super::*;
    use crate::store::{InMemoryApplyLog, InMemorySyncStorage};

    struct StaticAuth;
    impl AuthProvider for StaticAuth {
        fn token(&self) -> Option<String> {
            Some("tok".into())
        }
        fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
            let (_tx, rx) = broadcast::channel(1);
            rx
        }
    }

    fn fast_policy() -> ConnectionPolicy {
        ConnectionPolicy {
            connect_timeout: Duration::from_millis(500),
            auth_timeout: Duration::from_millis(500),
            ping_interval: Duration::from_secs(30),
            ping_interval_high_latency: Duration::from_secs(60),
            high_latency_threshold: Duration::from_secs(2),
            ping_timeout: Duration::from_millis(500),
            background_grace: Duration::from_secs(30),
            backoff: |_| Duration::from_millis(50),
        }
    }

    /// Scenario 1 (spec §8): cold start from an empty cursor drives the
    /// connection open, fires `getUpdatesState` with the 5-day lookback
    /// seed, and a `chatHasNewUpdates` push triggers exactly one
    /// `getUpdates` catch-up that lands in the apply log.
    #[tokio::test]
    async fn cold_start_end_to_end_reaches_open_and_catches_up_a_bucket() {
        let (client_io, mut server_io) = tokio::io::duplex(256 * 1024);
        let (events_tx, events_rx) = mpsc::channel(64);
        let transport: Arc<dyn Transport> = Arc::new(DuplexTransport::new(client_io, events_tx));
        let storage: Arc<dyn SyncStorage> = Arc::new(InMemorySyncStorage::new());
        let apply_log = Arc::new(InMemoryApplyLog::new());
        let apply: Arc<dyn ApplyUpdates> = apply_log.clone();

        let client = RealtimeClient::new(
            transport,
            events_rx,
            Arc::new(StaticAuth),
            1,
            fast_policy(),
            SyncConfig::default(),
            storage,
            apply,
            (),
        );

        let mut snapshots = client.subscribe();
        client.set_auth_available(true).unwrap();
        client.set_network_available(true).unwrap();
        client.start().unwrap();

        while snapshots.borrow().state != ConnectionState::Authenticating {
            snapshots.changed().await.unwrap();
        }
        let _init: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
        rc_wire::codec::send_message(&mut server_io, &ServerProtocolMessage::new(0, ServerBody::ConnectionOpen))
            .await
            .unwrap();

        while snapshots.borrow().state != ConnectionState::Open {
            snapshots.changed().await.unwrap();
        }

        // Two RPCs race to dispatch on open: getUpdatesState (b) and the
        // user-bucket fetch (a). Answer whichever arrives.
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let mut saw_get_updates_state = false;
        let mut saw_user_bucket_fetch = false;
        while !(saw_get_updates_state && saw_user_bucket_fetch) {
            let req: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
            let rc_wire::ClientBody::RpcCall { method, input } = req.body.clone() else {
                panic!("expected an RpcCall, got {:?}", req.body);
            };
            match method.as_str() {
                "getUpdatesState" => {
                    let date = input["date"].as_i64().unwrap();
                    assert!((now - 5 * 24 * 60 * 60 - date).abs() < 5);
                    saw_get_updates_state = true;
                    rc_wire::codec::send_message(
                        &mut server_io,
                        &ServerProtocolMessage::new(0, ServerBody::RpcResult { req_msg_id: req.id, result: serde_json::json!(null) }),
                    )
                    .await
                    .unwrap();
                }
                "getUpdates" => {
                    saw_user_bucket_fetch = true;
                    rc_wire::codec::send_message(
                        &mut server_io,
                        &ServerProtocolMessage::new(
                            0,
                            ServerBody::RpcResult {
                                req_msg_id: req.id,
                                result: serde_json::to_value(GetUpdatesOutput {
                                    seq: 0,
                                    date: 0,
                                    is_final: true,
                                    result_type: GetUpdatesResultType::Ok,
                                    updates: vec![],
                                })
                                .unwrap(),
                            },
                        ),
                    )
                    .await
                    .unwrap();
                }
                other => panic!("unexpected rpc method {other}"),
            }
        }

        // Server pushes chatHasNewUpdates{chatId: 7, seq: 42}: the client
        // must issue exactly one getUpdates catch-up fetch for that bucket.
        rc_wire::codec::send_message(
            &mut server_io,
            &ServerProtocolMessage::new(
                0,
                ServerBody::ServerMessage {
                    updates: vec![rc_wire::Update {
                        seq: None,
                        date: None,
                        kind: UpdateKind::ChatHasNewUpdates { chat_id: 7, seq: 42 },
                    }],
                },
            ),
        )
        .await
        .unwrap();

        let req: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
        let rc_wire::ClientBody::RpcCall { method, input } = req.body.clone() else {
            panic!("expected a getUpdates RpcCall");
        };
        assert_eq!(method, "getUpdates");
        let get_updates_input: rc_wire::GetUpdatesInput = serde_json::from_value(input).unwrap();
        assert_eq!(get_updates_input.bucket, BucketKey::chat(PeerId::User(7)));
        assert_eq!(get_updates_input.start_seq, 0);
        assert_eq!(get_updates_input.total_limit, Some(rc_config::BUCKET_FETCH_PAGE_SIZE));

        rc_wire::codec::send_message(
            &mut server_io,
            &ServerProtocolMessage::new(
                0,
                ServerBody::RpcResult {
                    req_msg_id: req.id,
                    result: serde_json::to_value(GetUpdatesOutput {
                        seq: 42,
                        date: 1_700_000_000,
                        is_final: true,
                        result_type: GetUpdatesResultType::Ok,
                        updates: vec![rc_wire::Update {
                            seq: Some(42),
                            date: Some(1_700_000_000),
                            kind: UpdateKind::DeleteChat { chat_id: 7 },
                        }],
                    })
                    .unwrap(),
                },
            ),
        )
        .await
        .unwrap();

        let bucket_key = BucketKey::chat(PeerId::User(7));
        let mut snapshot = client.bucket_snapshot(bucket_key).await;
        for _ in 0..100 {
            if snapshot.map(|s| s.seq) == Some(42) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            snapshot = client.bucket_snapshot(bucket_key).await;
        }
        let snapshot = snapshot.expect("bucket actor present after catch-up");
        assert_eq!(snapshot.seq, 42);
        assert_eq!(snapshot.date, 1_700_000_000);
        assert_eq!(apply_log.len().await, 1);
    }
}
