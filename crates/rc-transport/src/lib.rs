//! The duplex byte-stream transport collaborator.
//!
//! A [`Transport`] knows nothing about the application protocol — it
//! connects, disconnects, moves whole length-prefixed frames, and reports
//! its own lifecycle. The protocol session layers framing semantics
//! (handshake, RPC correlation) on top.

pub mod duplex;
pub mod error;
pub mod tcp;

pub use duplex::DuplexTransport;
pub use error::TransportError;
pub use tcp::TcpTransport;

use bytes::Bytes;

/// Lifecycle and data events a transport reports on its event channel.
///
/// `Frame` carries one already-delimited frame of bytes (the payload
/// `rc_wire::codec::read_frame` would have returned) — the consumer decodes
/// it into a typed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected(Option<String>),
    Frame(Bytes),
}

/// Duplex byte stream abstraction a protocol session drives.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Request a dial. Non-blocking: the caller observes the outcome via
    /// the event channel (`Connecting` then `Connected`/`Disconnected`).
    async fn connect(&self);

    /// Graceful close; emits `Disconnected(None)`.
    async fn disconnect(&self);

    /// Send one already-framed payload (the caller has already encoded it
    /// with `rc_wire::codec::encode_message`).
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;
}

/// Shared reader loop: pulls length-prefixed frames off `reader` and
/// forwards them as `TransportEvent::Frame`, emitting `Disconnected` and
/// returning on EOF, decode error, or a closed event channel.
pub(crate) async fn read_loop<R>(mut reader: R, events_tx: tokio::sync::mpsc::Sender<TransportEvent>)
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    loop {
        match rc_wire::codec::read_frame(&mut reader).await {
            Ok(bytes) => {
                if events_tx.send(TransportEvent::Frame(bytes)).await.is_err() {
                    return;
                }
            }
            Err(rc_wire::FrameError::Io(io))
                if io.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                let _ = events_tx.send(TransportEvent::Disconnected(None)).await;
                return;
            }
            Err(e) => {
                let _ = events_tx
                    .send(TransportEvent::Disconnected(Some(e.to_string())))
                    .await;
                return;
            }
        }
    }
}
