//! `ProtocolSession`: the reactor task that owns a [`Transport`] and speaks
//! the client/server message protocol over it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rc_transport::{Transport, TransportEvent};
use rc_wire::{ClientBody, ClientMessage, ServerBody, ServerProtocolMessage};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::auth::AuthProvider;
use crate::commands::{RpcCallError, RpcCallOutcome, SessionCommand};
use crate::error::SessionError;
use crate::events::SessionEvent;

const EVENTS_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 256;

/// One protocol session per logical connection lifetime; reused across
/// reconnect attempts by calling `start_transport`/`start_handshake` again
/// rather than constructing a new instance each time.
pub struct ProtocolSession {
    cmd_tx: mpsc::Sender<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
    msg_id: Arc<AtomicU64>,
    seq: Arc<AtomicU32>,
}

impl ProtocolSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        auth: Arc<dyn AuthProvider>,
        build_number: u32,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENTS_CAPACITY);
        let msg_id = Arc::new(AtomicU64::new(1));
        let seq = Arc::new(AtomicU32::new(1));

        tokio::spawn(reactor_task(
            transport,
            transport_events,
            cmd_rx,
            events_tx.clone(),
            auth,
            build_number,
        ));

        Self {
            cmd_tx,
            events_tx,
            msg_id,
            seq,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub async fn start_transport(&self) -> Result<(), SessionError> {
        self.send_command(SessionCommand::StartTransport).await
    }

    pub async fn stop_transport(&self) -> Result<(), SessionError> {
        self.send_command(SessionCommand::StopTransport).await
    }

    pub async fn start_handshake(&self) -> Result<(), SessionError> {
        self.send_command(SessionCommand::StartHandshake).await
    }

    pub async fn send_ping(&self, nonce: u64) -> Result<(), SessionError> {
        self.send_command(SessionCommand::SendPing { nonce }).await
    }

    pub async fn send_ack(&self, msg_id: u64) -> Result<(), SessionError> {
        self.send_command(SessionCommand::SendAck { msg_id }).await
    }

    /// Fire an RPC with no interest in the result; the caller learns the
    /// outcome (if any) from `subscribe()`'s `RpcResult`/`RpcError` events.
    /// This is what the transaction engine uses.
    pub async fn send_rpc(&self, method: impl Into<String>, input: serde_json::Value) -> Result<u64, SessionError> {
        let (msg_id, msg) = self.build_rpc_message(method, input);
        self.cmd_tx
            .send(SessionCommand::SendRpc {
                msg_id,
                msg,
                waiter: None,
            })
            .await
            .map_err(|_| SessionError::ReactorGone)?;
        Ok(msg_id)
    }

    /// Fire an RPC and await its correlated result, optionally bounded by a
    /// timeout. Used for request/response calls outside the transaction
    /// queue (e.g. `getUpdates`).
    pub async fn call_rpc(
        &self,
        method: impl Into<String>,
        input: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, SessionError> {
        let (msg_id, msg) = self.build_rpc_message(method, input);
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::SendRpc {
                msg_id,
                msg,
                waiter: Some(waiter_tx),
            })
            .await
            .map_err(|_| SessionError::ReactorGone)?;

        let received = match timeout {
            Some(d) => match tokio::time::timeout(d, waiter_rx).await {
                Ok(r) => r,
                Err(_) => {
                    let _ = self.cmd_tx.send(SessionCommand::CancelWaiter { msg_id }).await;
                    return Err(SessionError::Timeout);
                }
            },
            None => waiter_rx.await,
        };

        match received {
            Ok(outcome) => outcome_to_result(outcome),
            Err(_) => Err(SessionError::ReactorGone),
        }
    }

    fn build_rpc_message(&self, method: impl Into<String>, input: serde_json::Value) -> (u64, ClientMessage) {
        let msg_id = self.msg_id.fetch_add(1, Ordering::SeqCst);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let msg = ClientMessage::new(msg_id, seq, ClientBody::RpcCall { method: method.into(), input });
        (msg_id, msg)
    }

    async fn send_command(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.cmd_tx.send(cmd).await.map_err(|_| SessionError::ReactorGone)
    }
}

fn outcome_to_result(outcome: RpcCallOutcome) -> Result<serde_json::Value, SessionError> {
    match outcome {
        Ok(value) => Ok(value),
        Err(RpcCallError::Wire { code, message }) => Err(SessionError::Rpc { code, message }),
        Err(RpcCallError::ConnectionLost) => Err(SessionError::ConnectionLost),
    }
}

struct ReactorState {
    handshake_msg_id: Option<u64>,
    dispatched: HashSet<u64>,
    waiters: HashMap<u64, oneshot::Sender<RpcCallOutcome>>,
    pending_ping_nonce: Option<u64>,
}

impl ReactorState {
    fn new() -> Self {
        Self {
            handshake_msg_id: None,
            dispatched: HashSet::new(),
            waiters: HashMap::new(),
            pending_ping_nonce: None,
        }
    }

    /// Reset per-connection bookkeeping; a new connection gets a clean slate
    /// but the message id/seq counters are never reset.
    fn reset_for_new_connection(&mut self) {
        self.handshake_msg_id = None;
        self.dispatched.clear();
        self.pending_ping_nonce = None;
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(RpcCallError::ConnectionLost));
        }
    }
}

async fn reactor_task(
    transport: Arc<dyn Transport>,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
    auth: Arc<dyn AuthProvider>,
    build_number: u32,
) {
    let mut state = ReactorState::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("protocol session command channel closed, reactor exiting");
                    return;
                };
                handle_command(cmd, &transport, &auth, build_number, &mut state).await;
            }
            event = transport_events.recv() => {
                let Some(event) = event else {
                    debug!("transport event channel closed, reactor exiting");
                    return;
                };
                handle_transport_event(event, &transport, &events_tx, &mut state).await;
            }
        }
    }
}

async fn handle_command(
    cmd: SessionCommand,
    transport: &Arc<dyn Transport>,
    auth: &Arc<dyn AuthProvider>,
    build_number: u32,
    state: &mut ReactorState,
) {
    match cmd {
        SessionCommand::StartTransport => transport.connect().await,
        SessionCommand::StopTransport => transport.disconnect().await,
        SessionCommand::StartHandshake => {
            let msg_id = 0;
            let msg = ClientMessage::new(
                msg_id,
                0,
                ClientBody::ConnectionInit {
                    token: auth.token().unwrap_or_default(),
                    build: build_number,
                },
            );
            state.handshake_msg_id = Some(msg_id);
            send_frame(transport, &msg).await;
        }
        SessionCommand::SendRpc { msg_id, msg, waiter } => {
            if let Some(waiter) = waiter {
                state.waiters.insert(msg_id, waiter);
            }
            send_frame(transport, &msg).await;
        }
        SessionCommand::SendPing { nonce } => {
            state.pending_ping_nonce = Some(nonce);
            send_frame(transport, &ClientMessage::new(0, 0, ClientBody::Ping { nonce })).await;
        }
        SessionCommand::SendAck { msg_id } => {
            send_frame(transport, &ClientMessage::new(0, 0, ClientBody::Ack { msg_id })).await;
        }
        SessionCommand::CancelWaiter { msg_id } => {
            state.waiters.remove(&msg_id);
        }
    }
}

async fn send_frame(transport: &Arc<dyn Transport>, msg: &ClientMessage) {
    match rc_wire::codec::encode_message(msg) {
        Ok(payload) => {
            if let Err(e) = transport.send(payload).await {
                warn!(error = %e, "failed to send protocol message");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode protocol message"),
    }
}

async fn handle_transport_event(
    event: TransportEvent,
    transport: &Arc<dyn Transport>,
    events_tx: &broadcast::Sender<SessionEvent>,
    state: &mut ReactorState,
) {
    match event {
        TransportEvent::Connecting => {
            let _ = events_tx.send(SessionEvent::TransportConnecting);
        }
        TransportEvent::Connected => {
            let _ = events_tx.send(SessionEvent::TransportConnected);
        }
        TransportEvent::Disconnected(desc) => {
            if state.handshake_msg_id.is_some() {
                let _ = events_tx.send(SessionEvent::AuthFailed);
            }
            state.reset_for_new_connection();
            let _ = events_tx.send(SessionEvent::TransportDisconnected(desc));
        }
        TransportEvent::Frame(bytes) => {
            match rc_wire::codec::decode_message::<ServerProtocolMessage>(&bytes) {
                Ok(msg) => dispatch_server_message(msg, events_tx, state),
                Err(e) => {
                    warn!(error = %e, "discarding undecodable frame, tearing down transport");
                    transport.disconnect().await;
                }
            }
        }
    }
}

fn dispatch_server_message(
    msg: ServerProtocolMessage,
    events_tx: &broadcast::Sender<SessionEvent>,
    state: &mut ReactorState,
) {
    match msg.body {
        ServerBody::ConnectionOpen => {
            state.handshake_msg_id = None;
            let _ = events_tx.send(SessionEvent::ProtocolOpen);
        }
        ServerBody::RpcResult { req_msg_id, result } => {
            if state.dispatched.insert(req_msg_id) {
                if let Some(waiter) = state.waiters.remove(&req_msg_id) {
                    let _ = waiter.send(Ok(result.clone()));
                }
                let _ = events_tx.send(SessionEvent::RpcResult { req_msg_id, result });
            } else {
                debug!(req_msg_id, "duplicate rpcResult discarded");
            }
        }
        ServerBody::RpcError { req_msg_id, code, message } => {
            if state.handshake_msg_id == Some(req_msg_id) && code.is_auth_failure() {
                state.handshake_msg_id = None;
                let _ = events_tx.send(SessionEvent::AuthFailed);
                return;
            }
            if state.dispatched.insert(req_msg_id) {
                if let Some(waiter) = state.waiters.remove(&req_msg_id) {
                    let _ = waiter.send(Err(RpcCallError::Wire { code, message: message.clone() }));
                }
                let _ = events_tx.send(SessionEvent::RpcError { req_msg_id, code, message });
            } else {
                debug!(req_msg_id, "duplicate rpcError discarded");
            }
        }
        ServerBody::ServerMessage { updates } => {
            let _ = events_tx.send(SessionEvent::Updates(updates));
        }
        ServerBody::Ack { msg_id } => {
            let _ = events_tx.send(SessionEvent::Ack(msg_id));
        }
        ServerBody::Pong { nonce } => {
            if state.pending_ping_nonce == Some(nonce) {
                state.pending_ping_nonce = None;
            }
            let _ = events_tx.send(SessionEvent::Pong(nonce));
        }
    }
}
