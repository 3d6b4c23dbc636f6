//! `RpcError.code` — the fixed set of typed error codes the server may
//! return for an RPC call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorCode {
    Unknown,
    BadRequest,
    Unauthenticated,
    RateLimit,
    InternalError,
    PeerIdInvalid,
    MessageIdInvalid,
    UserIdInvalid,
    UserAlreadyMember,
    SpaceIdInvalid,
    ChatIdInvalid,
    EmailInvalid,
    PhoneNumberInvalid,
    SpaceAdminRequired,
    SpaceOwnerRequired,
}

impl RpcErrorCode {
    /// Whether this code, seen during handshake, means the token is bad
    /// rather than the request — the only code the Connection Manager
    /// treats as an auth failure.
    pub fn is_auth_failure(self) -> bool {
        matches!(self, RpcErrorCode::Unauthenticated)
    }
}

impl std::fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        write!(f, "{s}")
    }
}
