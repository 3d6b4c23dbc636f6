//! The connection state machine's vocabulary.

use std::time::Instant;

use crate::constraints::Constraints;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Stopped,
    WaitingForConstraints,
    ConnectingTransport,
    Authenticating,
    Open,
    Backoff,
    BackgroundSuspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateReason {
    Initial,
    UserStart,
    UserStop,
    ConstraintsSatisfied,
    ConstraintLost,
    TransportConnected,
    ProtocolOpen,
    ConnectTimeout,
    AuthTimeout,
    AuthFailed,
    PingTimeout,
    TransportDisconnected,
    BackoffFired,
    BackgroundGraceExpired,
}

/// Read-only snapshot published on every state transition.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub reason: StateReason,
    pub attempt: u32,
    pub session_id: u64,
    pub since: Instant,
    pub constraints: Constraints,
    pub last_error_description: Option<String>,
}

impl Snapshot {
    pub fn initial() -> Self {
        Self {
            state: ConnectionState::Stopped,
            reason: StateReason::Initial,
            attempt: 0,
            session_id: 0,
            since: Instant::now(),
            constraints: Constraints::default(),
            last_error_description: None,
        }
    }
}
