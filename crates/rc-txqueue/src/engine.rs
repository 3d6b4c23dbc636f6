//! `TransactionEngine<S>`: generalizes the retry loop in
//! `HootClient::request_with_trace` (fresh correlation id per attempt,
//! capped retries, small backoff) into a persistent FIFO queue whose
//! entries survive reconnect instead of failing after N attempts.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rc_session::{ProtocolSession, SessionEvent};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::error::TxError;
use crate::transaction::Transaction;

/// Settle window after reconnect before in-flight transactions are
/// resent, to let a result for an already-acked send still arrive.
const SETTLE_DELAY: Duration = Duration::from_millis(300);

struct PendingTx<S> {
    tx: Transaction<S>,
    waiter: oneshot::Sender<Result<serde_json::Value, TxError>>,
    rpc_msg_id: Option<u64>,
    ack_received: bool,
    /// Set when `RpcResult` arrives before the `Ack` does (the protocol
    /// does not order the two): held here until the ack lands, since §4.3
    /// state 3 requires both to be observed before completion.
    pending_result: Option<serde_json::Value>,
}

enum EngineCommand<S> {
    Enqueue(PendingTx<S>),
    SettleFired(u64),
}

/// Owns the FIFO queue; the caller supplies a cheap, cloneable local-store
/// handle `S` that the optimistic/apply/failed hooks run against.
pub struct TransactionEngine<S> {
    store: S,
    cmd_tx: mpsc::UnboundedSender<EngineCommand<S>>,
}

impl<S: Clone + Send + Sync + 'static> TransactionEngine<S> {
    pub fn new(
        store: S,
        session: Arc<ProtocolSession>,
        session_events: broadcast::Receiver<SessionEvent>,
        connection_open: watch::Receiver<bool>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(reactor_task(
            store.clone(),
            session,
            cmd_rx,
            cmd_tx.clone(),
            session_events,
            connection_open,
        ));
        Self { store, cmd_tx }
    }

    /// Enqueue a transaction, running its optimistic hook synchronously
    /// before returning, and await the terminal outcome.
    pub async fn send(&self, mut tx: Transaction<S>) -> Result<serde_json::Value, TxError> {
        let optimistic = std::mem::replace(&mut tx.optimistic, Box::new(|_s: &S| {}));
        optimistic(&self.store);

        let (waiter_tx, waiter_rx) = oneshot::channel();
        let pending = PendingTx {
            tx,
            waiter: waiter_tx,
            rpc_msg_id: None,
            ack_received: false,
            pending_result: None,
        };
        self.cmd_tx
            .send(EngineCommand::Enqueue(pending))
            .map_err(|_| TxError::Cancelled)?;
        waiter_rx.await.map_err(|_| TxError::Cancelled)?
    }
}

async fn reactor_task<S: Clone + Send + Sync + 'static>(
    store: S,
    session: Arc<ProtocolSession>,
    mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand<S>>,
    cmd_tx: mpsc::UnboundedSender<EngineCommand<S>>,
    mut session_events: broadcast::Receiver<SessionEvent>,
    mut connection_open: watch::Receiver<bool>,
) {
    let mut queue: VecDeque<PendingTx<S>> = VecDeque::new();
    let mut in_flight: HashMap<u64, PendingTx<S>> = HashMap::new();
    let mut connection_is_open = *connection_open.borrow();
    let mut settle_generation: u64 = 0;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(EngineCommand::Enqueue(pending)) => {
                        queue.push_back(pending);
                        if connection_is_open {
                            dispatch_ready(&session, &mut queue, &mut in_flight).await;
                        }
                    }
                    Some(EngineCommand::SettleFired(generation)) => {
                        if generation == settle_generation && connection_is_open {
                            dispatch_ready(&session, &mut queue, &mut in_flight).await;
                        }
                    }
                    None => return,
                }
            }
            event = session_events.recv() => {
                match event {
                    Ok(event) => handle_session_event(event, &mut in_flight, &store),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "transaction engine lagged behind session events");
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
                    settle_generation += 1;
                    let generation = settle_generation;
                    requeue_in_flight(&mut queue, &mut in_flight);
                    let cmd_tx = cmd_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(SETTLE_DELAY).await;
                        let _ = cmd_tx.send(EngineCommand::SettleFired(generation));
                    });
                } else if !now_open {
                    connection_is_open = false;
                }
            }
        }
    }
}

/// Move every still-incomplete in-flight transaction back to the head of
/// the queue, clearing its rpc correlation so it is resent with a fresh
/// msg id but the same `randomId`.
fn requeue_in_flight<S>(queue: &mut VecDeque<PendingTx<S>>, in_flight: &mut HashMap<u64, PendingTx<S>>) {
    for (_, mut pending) in in_flight.drain() {
        pending.rpc_msg_id = None;
        pending.ack_received = false;
        pending.pending_result = None;
        queue.push_front(pending);
    }
}

async fn dispatch_ready<S>(
    session: &Arc<ProtocolSession>,
    queue: &mut VecDeque<PendingTx<S>>,
    in_flight: &mut HashMap<u64, PendingTx<S>>,
) {
    while let Some(mut pending) = queue.pop_front() {
        let input = pending.tx.wire_input();
        match session.send_rpc(pending.tx.method.clone(), input).await {
            Ok(msg_id) => {
                pending.rpc_msg_id = Some(msg_id);
                in_flight.insert(msg_id, pending);
            }
            Err(e) => {
                warn!(error = %e, "failed to dispatch queued transaction, leaving queued");
                queue.push_front(pending);
                break;
            }
        }
    }
}

fn handle_session_event<S>(event: SessionEvent, in_flight: &mut HashMap<u64, PendingTx<S>>, store: &S) {
    match event {
        SessionEvent::Ack(msg_id) => {
            let stashed_result = if let Some(pending) = in_flight.get_mut(&msg_id) {
                pending.ack_received = true;
                debug!(msg_id, "transaction delivery acked");
                pending.pending_result.take()
            } else {
                None
            };
            if let Some(result) = stashed_result {
                if let Some(pending) = in_flight.remove(&msg_id) {
                    complete_with_result(pending, result, store);
                }
            }
        }
        // Ack and result can arrive in either order (§4.3 state 3); only
        // complete once both have been observed.
        SessionEvent::RpcResult { req_msg_id, result } => {
            let acked = in_flight.get(&req_msg_id).map(|p| p.ack_received).unwrap_or(false);
            if acked {
                if let Some(pending) = in_flight.remove(&req_msg_id) {
                    complete_with_result(pending, result, store);
                }
            } else if let Some(pending) = in_flight.get_mut(&req_msg_id) {
                debug!(req_msg_id, "rpc result arrived before ack, deferring completion");
                pending.pending_result = Some(result);
            }
        }
        SessionEvent::RpcError { req_msg_id, code, message } => {
            if let Some(pending) = in_flight.remove(&req_msg_id) {
                let PendingTx { tx, waiter, .. } = pending;
                let err = TxError::RpcError { code, message };
                (tx.failed)(store, err.clone());
                let _ = waiter.send(Err(err));
            }
        }
        SessionEvent::TransportConnecting
        | SessionEvent::TransportConnected
        | SessionEvent::TransportDisconnected(_)
        | SessionEvent::ProtocolOpen
        | SessionEvent::AuthFailed
        | SessionEvent::Updates(_)
        | SessionEvent::Pong(_) => {}
    }
}

fn complete_with_result<S>(pending: PendingTx<S>, result: serde_json::Value, store: &S) {
    let PendingTx { tx, waiter, .. } = pending;
    match (tx.apply)(store, result.clone()) {
        Ok(()) => {
            let _ = waiter.send(Ok(result));
        }
        Err(msg) => {
            let err = TxError::ExecutionError(msg);
            (tx.failed)(store, err.clone());
            let _ = waiter.send(Err(err));
        }
    }
}
