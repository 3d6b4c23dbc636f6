#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection manager reactor is gone")]
    ReactorGone,
}
