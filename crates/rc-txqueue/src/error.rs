use rc_wire::RpcErrorCode;

/// The classified outcome a transaction's caller continuation sees on
/// failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TxError {
    #[error("rpc error {code}: {message}")]
    RpcError { code: RpcErrorCode, message: String },
    #[error("apply hook failed: {0}")]
    ExecutionError(String),
    #[error("malformed rpc result: {0}")]
    Invalid(String),
    #[error("transaction cancelled before dispatch")]
    Cancelled,
}
