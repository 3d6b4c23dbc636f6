//! Internal command channel into the reactor task. Not part of the public
//! API — callers go through [`crate::ProtocolSession`]'s methods.

use rc_wire::{ClientMessage, RpcErrorCode};
use tokio::sync::oneshot;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcCallError {
    #[error("rpc error {code}: {message}")]
    Wire { code: RpcErrorCode, message: String },
    #[error("connection lost before a result arrived")]
    ConnectionLost,
}

pub type RpcCallOutcome = Result<serde_json::Value, RpcCallError>;

pub(crate) enum SessionCommand {
    StartTransport,
    StopTransport,
    StartHandshake,
    SendRpc {
        msg_id: u64,
        msg: ClientMessage,
        waiter: Option<oneshot::Sender<RpcCallOutcome>>,
    },
    SendPing {
        nonce: u64,
    },
    SendAck {
        msg_id: u64,
    },
    CancelWaiter {
        msg_id: u64,
    },
}
