//! Client→server wire messages.

use serde::{Deserialize, Serialize};

/// Tagged union of the four message kinds a client ever sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientBody {
    ConnectionInit { token: String, build: u32 },
    RpcCall { method: String, input: serde_json::Value },
    Ack { msg_id: u64 },
    Ping { nonce: u64 },
}

/// `ClientMessage { id, seq, body }` — every client frame carries a
/// client-assigned monotonically increasing id and sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub id: u64,
    pub seq: u32,
    pub body: ClientBody,
}

impl ClientMessage {
    pub fn new(id: u64, seq: u32, body: ClientBody) -> Self {
        Self { id, seq, body }
    }
}
