#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] rc_wire::FrameError),
    #[error("not connected")]
    NotConnected,
    #[error("events channel closed")]
    EventsClosed,
}
