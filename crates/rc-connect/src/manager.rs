//! `ConnectionManager`: the connection state machine reactor,
//! grounded on `GardenManager`'s `Arc<RwLock<ConnectionState>>` but exposed
//! as a `watch::Sender<Snapshot>` so callers can `.changed().await` instead
//! of polling, and on `garden_peer.rs`'s keepalive task for the
//! session-id-stamped timer discipline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rc_config::ConnectionPolicy;
use rc_session::{ProtocolSession, SessionEvent};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::constraints::Constraints;
use crate::error::ConnectError;
use crate::state::{ConnectionState, Snapshot, StateReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKind {
    ConnectTimeout,
    AuthTimeout,
    PingInterval,
    PingTimeout,
    BackgroundGrace,
    Backoff,
}

enum ManagerEvent {
    Start,
    Stop,
    ConnectNow,
    AuthAvailable(bool),
    NetworkAvailable(bool),
    AppActive(bool),
    Session(SessionEvent),
    TimerFired {
        kind: TimerKind,
        session_id: u64,
        epoch: u64,
    },
}

/// Drives one [`ProtocolSession`] through the connection state machine.
/// Long-lived: survives reconnects by incrementing an internal session id
/// rather than being recreated.
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<ManagerEvent>,
    snapshot_rx: watch::Receiver<Snapshot>,
    session: Arc<ProtocolSession>,
}

impl ConnectionManager {
    pub fn new(session: Arc<ProtocolSession>, policy: ConnectionPolicy) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::initial());
        let session_events = session.subscribe();

        tokio::spawn(reactor_task(
            session.clone(),
            policy,
            cmd_rx,
            cmd_tx.clone(),
            snapshot_tx,
            session_events,
        ));

        Self {
            cmd_tx,
            snapshot_rx,
            session,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// The forwarded session event stream upper layers (engines) consume
    /// instead of holding the session directly.
    pub fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn session(&self) -> &Arc<ProtocolSession> {
        &self.session
    }

    pub fn start(&self) -> Result<(), ConnectError> {
        self.send(ManagerEvent::Start)
    }

    pub fn stop(&self) -> Result<(), ConnectError> {
        self.send(ManagerEvent::Stop)
    }

    pub fn connect_now(&self) -> Result<(), ConnectError> {
        self.send(ManagerEvent::ConnectNow)
    }

    pub fn set_auth_available(&self, available: bool) -> Result<(), ConnectError> {
        self.send(ManagerEvent::AuthAvailable(available))
    }

    pub fn set_network_available(&self, available: bool) -> Result<(), ConnectError> {
        self.send(ManagerEvent::NetworkAvailable(available))
    }

    pub fn set_app_active(&self, active: bool) -> Result<(), ConnectError> {
        self.send(ManagerEvent::AppActive(active))
    }

    fn send(&self, event: ManagerEvent) -> Result<(), ConnectError> {
        self.cmd_tx.send(event).map_err(|_| ConnectError::ReactorGone)
    }
}

struct ReactorState {
    snapshot: Snapshot,
    constraints: Constraints,
    consecutive_auth_failures: u32,
    timer_epoch: HashMap<TimerKind, u64>,
    outstanding_ping_nonce: Option<u64>,
    ping_sent_at: Option<Instant>,
    last_latency: Duration,
    next_ping_nonce: u64,
}

impl ReactorState {
    fn new() -> Self {
        Self {
            snapshot: Snapshot::initial(),
            constraints: Constraints::default(),
            consecutive_auth_failures: 0,
            timer_epoch: HashMap::new(),
            outstanding_ping_nonce: None,
            ping_sent_at: None,
            last_latency: Duration::ZERO,
            next_ping_nonce: 1,
        }
    }

    fn bump_epoch(&mut self, kind: TimerKind) -> u64 {
        let epoch = self.timer_epoch.entry(kind).or_insert(0);
        *epoch += 1;
        *epoch
    }

    fn current_epoch(&self, kind: TimerKind) -> u64 {
        self.timer_epoch.get(&kind).copied().unwrap_or(0)
    }

    fn transition(&mut self, state: ConnectionState, reason: StateReason) {
        debug!(?state, ?reason, attempt = self.snapshot.attempt, "connection state transition");
        self.snapshot = Snapshot {
            state,
            reason,
            attempt: self.snapshot.attempt,
            session_id: self.snapshot.session_id,
            since: Instant::now(),
            constraints: self.constraints,
            last_error_description: self.snapshot.last_error_description.clone(),
        };
    }
}

fn schedule_timer(
    cmd_tx: &mpsc::UnboundedSender<ManagerEvent>,
    kind: TimerKind,
    session_id: u64,
    epoch: u64,
    delay: Duration,
) {
    let cmd_tx = cmd_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = cmd_tx.send(ManagerEvent::TimerFired { kind, session_id, epoch });
    });
}

async fn reactor_task(
    session: Arc<ProtocolSession>,
    policy: ConnectionPolicy,
    mut cmd_rx: mpsc::UnboundedReceiver<ManagerEvent>,
    cmd_tx: mpsc::UnboundedSender<ManagerEvent>,
    snapshot_tx: watch::Sender<Snapshot>,
    mut session_events: broadcast::Receiver<SessionEvent>,
) {
    let mut state = ReactorState::new();

    loop {
        tokio::select! {
            event = cmd_rx.recv() => {
                let Some(event) = event else { return; };
                handle_event(event, &session, &policy, &cmd_tx, &mut state).await;
            }
            event = session_events.recv() => {
                match event {
                    Ok(event) => handle_event(ManagerEvent::Session(event), &session, &policy, &cmd_tx, &mut state).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "connection manager lagged behind session events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
        let _ = snapshot_tx.send(state.snapshot.clone());
    }
}

async fn handle_event(
    event: ManagerEvent,
    session: &Arc<ProtocolSession>,
    policy: &ConnectionPolicy,
    cmd_tx: &mpsc::UnboundedSender<ManagerEvent>,
    state: &mut ReactorState,
) {
    use ConnectionState::*;

    match event {
        ManagerEvent::Start => {
            state.constraints.user_wants_connection = true;
            if state.snapshot.state == Stopped && state.constraints.gate_satisfied() {
                begin_connecting(session, policy, cmd_tx, state, StateReason::UserStart).await;
            } else if state.snapshot.state == Stopped {
                state.transition(WaitingForConstraints, StateReason::UserStart);
            }
        }
        ManagerEvent::Stop => {
            state.constraints.user_wants_connection = false;
            session.stop_transport().await.ok();
            state.transition(Stopped, StateReason::UserStop);
        }
        ManagerEvent::ConnectNow => {
            reset_attempt(state);
            if state.constraints.gate_satisfied()
                && matches!(state.snapshot.state, WaitingForConstraints | Backoff)
            {
                begin_connecting(session, policy, cmd_tx, state, StateReason::ConstraintsSatisfied).await;
            }
        }
        ManagerEvent::AuthAvailable(available) => {
            state.constraints.auth_available = available;
            handle_constraint_change(available, session, policy, cmd_tx, state).await;
        }
        ManagerEvent::NetworkAvailable(available) => {
            state.constraints.network_available = available;
            handle_constraint_change(available, session, policy, cmd_tx, state).await;
        }
        ManagerEvent::AppActive(active) => {
            state.constraints.app_active = active;
            if active {
                reset_attempt(state);
                if state.snapshot.state == BackgroundSuspended {
                    if state.constraints.gate_satisfied() {
                        begin_connecting(session, policy, cmd_tx, state, StateReason::ConstraintsSatisfied).await;
                    } else {
                        state.transition(WaitingForConstraints, StateReason::ConstraintsSatisfied);
                    }
                } else {
                    // cancel any running background-grace timer
                    state.bump_epoch(TimerKind::BackgroundGrace);
                }
            } else if matches!(state.snapshot.state, ConnectingTransport | Authenticating | Open) {
                let epoch = state.bump_epoch(TimerKind::BackgroundGrace);
                schedule_timer(cmd_tx, TimerKind::BackgroundGrace, state.snapshot.session_id, epoch, policy.background_grace);
            }
        }
        ManagerEvent::Session(event) => handle_session_event(event, session, policy, cmd_tx, state).await,
        ManagerEvent::TimerFired { kind, session_id, epoch } => {
            if session_id != state.snapshot.session_id || epoch != state.current_epoch(kind) {
                debug!(?kind, session_id, epoch, "discarding stale timer fire");
                return;
            }
            handle_timer_fired(kind, session, policy, cmd_tx, state).await;
        }
    }
}

async fn handle_constraint_change(
    available: bool,
    session: &Arc<ProtocolSession>,
    policy: &ConnectionPolicy,
    cmd_tx: &mpsc::UnboundedSender<ManagerEvent>,
    state: &mut ReactorState,
) {
    use ConnectionState::*;
    if available {
        reset_attempt(state);
        if matches!(state.snapshot.state, WaitingForConstraints | Backoff) && state.constraints.gate_satisfied() {
            begin_connecting(session, policy, cmd_tx, state, StateReason::ConstraintsSatisfied).await;
        }
    } else if !state.constraints.gate_satisfied()
        && matches!(state.snapshot.state, ConnectingTransport | Authenticating | Open | Backoff | BackgroundSuspended)
    {
        session.stop_transport().await.ok();
        state.transition(WaitingForConstraints, StateReason::ConstraintLost);
    }
}

async fn begin_connecting(
    session: &Arc<ProtocolSession>,
    policy: &ConnectionPolicy,
    cmd_tx: &mpsc::UnboundedSender<ManagerEvent>,
    state: &mut ReactorState,
    reason: StateReason,
) {
    state.snapshot.session_id += 1;
    state.transition(ConnectionState::ConnectingTransport, reason);
    session.start_transport().await.ok();
    let epoch = state.bump_epoch(TimerKind::ConnectTimeout);
    schedule_timer(cmd_tx, TimerKind::ConnectTimeout, state.snapshot.session_id, epoch, policy.connect_timeout);
}

fn reset_attempt(state: &mut ReactorState) {
    state.snapshot.attempt = 0;
    state.consecutive_auth_failures = 0;
    state.bump_epoch(TimerKind::Backoff);
}

async fn enter_backoff(
    session: &Arc<ProtocolSession>,
    policy: &ConnectionPolicy,
    cmd_tx: &mpsc::UnboundedSender<ManagerEvent>,
    state: &mut ReactorState,
    reason: StateReason,
    error_description: Option<String>,
) {
    session.stop_transport().await.ok();
    state.snapshot.attempt += 1;
    state.snapshot.last_error_description = error_description;
    state.transition(ConnectionState::Backoff, reason);
    let delay = (policy.backoff)(state.snapshot.attempt);
    let epoch = state.bump_epoch(TimerKind::Backoff);
    schedule_timer(cmd_tx, TimerKind::Backoff, state.snapshot.session_id, epoch, delay);
}

async fn handle_session_event(
    event: SessionEvent,
    session: &Arc<ProtocolSession>,
    policy: &ConnectionPolicy,
    cmd_tx: &mpsc::UnboundedSender<ManagerEvent>,
    state: &mut ReactorState,
) {
    use ConnectionState::*;
    match event {
        SessionEvent::TransportConnecting => {}
        SessionEvent::TransportConnected => {
            if state.snapshot.state == ConnectingTransport {
                state.bump_epoch(TimerKind::ConnectTimeout);
                state.transition(Authenticating, StateReason::TransportConnected);
                session.start_handshake().await.ok();
                let epoch = state.bump_epoch(TimerKind::AuthTimeout);
                schedule_timer(cmd_tx, TimerKind::AuthTimeout, state.snapshot.session_id, epoch, policy.auth_timeout);
            }
        }
        SessionEvent::ProtocolOpen => {
            if state.snapshot.state == Authenticating {
                state.bump_epoch(TimerKind::AuthTimeout);
                reset_attempt(state);
                state.transition(Open, StateReason::ProtocolOpen);
                start_ping_cycle(session, policy, cmd_tx, state).await;
            }
        }
        SessionEvent::AuthFailed => {
            if state.snapshot.state == Authenticating {
                state.consecutive_auth_failures += 1;
                if state.consecutive_auth_failures >= 2 {
                    session.stop_transport().await.ok();
                    state.snapshot.attempt = 0;
                    state.consecutive_auth_failures = 0;
                    state.transition(WaitingForConstraints, StateReason::AuthFailed);
                } else {
                    enter_backoff(session, policy, cmd_tx, state, StateReason::AuthFailed, None).await;
                }
            }
        }
        SessionEvent::TransportDisconnected(desc) => {
            if matches!(state.snapshot.state, ConnectingTransport | Authenticating | Open | BackgroundSuspended) {
                enter_backoff(session, policy, cmd_tx, state, StateReason::TransportDisconnected, desc).await;
            }
        }
        SessionEvent::Pong(nonce) => {
            if state.snapshot.state == Open && state.outstanding_ping_nonce == Some(nonce) {
                state.outstanding_ping_nonce = None;
                if let Some(sent_at) = state.ping_sent_at.take() {
                    state.last_latency = sent_at.elapsed();
                }
                state.bump_epoch(TimerKind::PingTimeout);
                schedule_next_ping(session, policy, cmd_tx, state).await;
            }
        }
        SessionEvent::Ack(_) | SessionEvent::RpcResult { .. } | SessionEvent::RpcError { .. } | SessionEvent::Updates(_) => {
            // consumed by the transaction/sync engines via the forwarded
            // session event stream, not by the state machine itself.
        }
    }
}

async fn start_ping_cycle(
    session: &Arc<ProtocolSession>,
    policy: &ConnectionPolicy,
    cmd_tx: &mpsc::UnboundedSender<ManagerEvent>,
    state: &mut ReactorState,
) {
    schedule_next_ping(session, policy, cmd_tx, state).await;
}

async fn schedule_next_ping(
    _session: &Arc<ProtocolSession>,
    policy: &ConnectionPolicy,
    cmd_tx: &mpsc::UnboundedSender<ManagerEvent>,
    state: &mut ReactorState,
) {
    let interval = policy.ping_interval_for(state.last_latency);
    let epoch = state.bump_epoch(TimerKind::PingInterval);
    schedule_timer(cmd_tx, TimerKind::PingInterval, state.snapshot.session_id, epoch, interval);
}

async fn handle_timer_fired(
    kind: TimerKind,
    session: &Arc<ProtocolSession>,
    policy: &ConnectionPolicy,
    cmd_tx: &mpsc::UnboundedSender<ManagerEvent>,
    state: &mut ReactorState,
) {
    use ConnectionState::*;
    match kind {
        TimerKind::ConnectTimeout => {
            if state.snapshot.state == ConnectingTransport {
                enter_backoff(session, policy, cmd_tx, state, StateReason::ConnectTimeout, Some("connect timed out".into())).await;
            }
        }
        TimerKind::AuthTimeout => {
            if state.snapshot.state == Authenticating {
                enter_backoff(session, policy, cmd_tx, state, StateReason::AuthTimeout, Some("auth timed out".into())).await;
            }
        }
        TimerKind::PingInterval => {
            if state.snapshot.state == Open {
                state.next_ping_nonce += 1;
                let nonce = state.next_ping_nonce;
                state.outstanding_ping_nonce = Some(nonce);
                state.ping_sent_at = Some(Instant::now());
                session.send_ping(nonce).await.ok();
                let epoch = state.bump_epoch(TimerKind::PingTimeout);
                schedule_timer(cmd_tx, TimerKind::PingTimeout, state.snapshot.session_id, epoch, policy.ping_timeout);
            }
        }
        TimerKind::PingTimeout => {
            if state.snapshot.state == Open && state.outstanding_ping_nonce.is_some() {
                state.outstanding_ping_nonce = None;
                enter_backoff(session, policy, cmd_tx, state, StateReason::PingTimeout, Some("ping timed out".into())).await;
            }
        }
        TimerKind::BackgroundGrace => {
            if matches!(state.snapshot.state, ConnectingTransport | Authenticating | Open) && !state.constraints.app_active {
                session.stop_transport().await.ok();
                state.transition(BackgroundSuspended, StateReason::BackgroundGraceExpired);
            }
        }
        TimerKind::Backoff => {
            if state.snapshot.state == Backoff {
                if state.constraints.gate_satisfied() {
                    info!("backoff elapsed, reconnecting");
                    begin_connecting(session, policy, cmd_tx, state, StateReason::BackoffFired).await;
                } else {
                    state.transition(WaitingForConstraints, StateReason::ConstraintLost);
                }
            }
        }
    }
}
