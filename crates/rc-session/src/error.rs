use rc_wire::RpcErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol session reactor is gone")]
    ReactorGone,
    #[error("rpc call timed out")]
    Timeout,
    #[error("rpc error {code}: {message}")]
    Rpc { code: RpcErrorCode, message: String },
    #[error("connection lost before a result arrived")]
    ConnectionLost,
}
