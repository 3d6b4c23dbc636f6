//! Events a [`crate::ProtocolSession`] broadcasts to its observers.

use rc_wire::{RpcErrorCode, Update};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    TransportConnecting,
    TransportConnected,
    /// The transport closed or failed; `None` for a graceful local close.
    TransportDisconnected(Option<String>),
    /// `connectionOpen` received — the handshake succeeded.
    ProtocolOpen,
    /// The handshake's own `connectionInit` came back `UNAUTHENTICATED`, or
    /// the socket closed before `connectionOpen` arrived.
    AuthFailed,
    Ack(u64),
    RpcResult {
        req_msg_id: u64,
        result: serde_json::Value,
    },
    RpcError {
        req_msg_id: u64,
        code: RpcErrorCode,
        message: String,
    },
    Updates(Vec<Update>),
    Pong(u64),
}
