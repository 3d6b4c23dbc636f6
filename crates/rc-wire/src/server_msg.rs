//! Server→client wire messages.

use serde::{Deserialize, Serialize};

use crate::rpc_error::RpcErrorCode;
use crate::update::Update;

/// Tagged union of the six message kinds the server ever sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerBody {
    ConnectionOpen,
    RpcResult {
        req_msg_id: u64,
        result: serde_json::Value,
    },
    RpcError {
        req_msg_id: u64,
        code: RpcErrorCode,
        message: String,
    },
    ServerMessage {
        updates: Vec<Update>,
    },
    Ack {
        msg_id: u64,
    },
    Pong {
        nonce: u64,
    },
}

/// `ServerProtocolMessage { id, body }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerProtocolMessage {
    pub id: u64,
    pub body: ServerBody,
}

impl ServerProtocolMessage {
    pub fn new(id: u64, body: ServerBody) -> Self {
        Self { id, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::PeerId;
    use pretty_assertions::assert_eq;
    use crate::update::UpdateKind;

    #[test]
    fn rpc_error_roundtrips_through_msgpack() {
        let msg = ServerProtocolMessage::new(
            5,
            ServerBody::RpcError {
                req_msg_id: 3,
                code: RpcErrorCode::Unauthenticated,
                message: "token expired".into(),
            },
        );
        let bytes = rmp_serde::to_vec_named(&msg).unwrap();
        let back: ServerProtocolMessage = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn server_message_carries_updates() {
        let msg = ServerProtocolMessage::new(
            1,
            ServerBody::ServerMessage {
                updates: vec![Update {
                    seq: Some(1),
                    date: Some(2),
                    kind: UpdateKind::ChatHasNewUpdates { chat_id: 7, seq: 1 },
                }],
            },
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerProtocolMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn connection_open_has_no_payload() {
        let json = serde_json::to_string(&ServerBody::ConnectionOpen).unwrap();
        assert_eq!(json, "{\"type\":\"connectionOpen\"}");
    }

    #[test]
    fn dialog_archive_update_references_peer() {
        let update = Update {
            seq: Some(1),
            date: Some(1),
            kind: UpdateKind::DialogArchived {
                peer: PeerId::User(9),
                archived: true,
            },
        };
        assert_eq!(update.bucket_key(), update.kind.bucket_key());
    }
}
