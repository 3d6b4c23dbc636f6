//! An in-memory `tokio::io::duplex`-backed transport standing in for a
//! fake server endpoint in tests.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};

use crate::{read_loop, Transport, TransportError, TransportEvent};

pub struct DuplexTransport {
    events_tx: mpsc::Sender<TransportEvent>,
    read_half: Arc<Mutex<Option<ReadHalf<DuplexStream>>>>,
    write_half: Arc<Mutex<Option<WriteHalf<DuplexStream>>>>,
}

impl DuplexTransport {
    pub fn new(io: DuplexStream, events_tx: mpsc::Sender<TransportEvent>) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            events_tx,
            read_half: Arc::new(Mutex::new(Some(read_half))),
            write_half: Arc::new(Mutex::new(Some(write_half))),
        }
    }
}

#[async_trait::async_trait]
impl Transport for DuplexTransport {
    async fn connect(&self) {
        let _ = self.events_tx.send(TransportEvent::Connecting).await;
        let read_half = self.read_half.lock().await.take();
        match read_half {
            Some(read_half) => {
                let _ = self.events_tx.send(TransportEvent::Connected).await;
                tokio::spawn(read_loop(read_half, self.events_tx.clone()));
            }
            None => {
                let _ = self
                    .events_tx
                    .send(TransportEvent::Disconnected(Some(
                        "duplex transport already connected once".into(),
                    )))
                    .await;
            }
        }
    }

    async fn disconnect(&self) {
        if let Some(mut half) = self.write_half.lock().await.take() {
            let _ = half.shutdown().await;
        }
        let _ = self.events_tx.send(TransportEvent::Disconnected(None)).await;
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let mut guard = self.write_half.lock().await;
        let half = guard.as_mut().ok_or(TransportError::NotConnected)?;
        rc_wire::codec::write_frame(half, &frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn connect_then_send_delivers_a_frame_to_the_peer() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let transport = DuplexTransport::new(client_io, events_tx);

        transport.connect().await;
        assert_eq!(events_rx.recv().await, Some(TransportEvent::Connecting));
        assert_eq!(events_rx.recv().await, Some(TransportEvent::Connected));

        transport.send(Bytes::from_static(b"hello")).await.unwrap();
        let received = rc_wire::codec::read_frame(&mut server_io).await.unwrap();
        assert_eq!(&received[..], b"hello");
    }

    #[tokio::test]
    async fn frames_written_by_the_peer_surface_as_events() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let transport = DuplexTransport::new(client_io, events_tx);
        transport.connect().await;
        let _ = events_rx.recv().await; // Connecting
        let _ = events_rx.recv().await; // Connected

        rc_wire::codec::write_frame(&mut server_io, b"pushed")
            .await
            .unwrap();
        assert_eq!(
            events_rx.recv().await,
            Some(TransportEvent::Frame(Bytes::from_static(b"pushed")))
        );
    }

    #[tokio::test]
    async fn disconnect_emits_disconnected_with_no_error() {
        let (client_io, _server_io) = tokio::io::duplex(4096);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let transport = DuplexTransport::new(client_io, events_tx);
        transport.connect().await;
        let _ = events_rx.recv().await;
        let _ = events_rx.recv().await;

        transport.disconnect().await;
        assert_eq!(events_rx.recv().await, Some(TransportEvent::Disconnected(None)));
    }

    #[tokio::test]
    async fn send_before_connect_is_a_transport_error() {
        let (client_io, _server_io) = tokio::io::duplex(4096);
        let (events_tx, _events_rx) = mpsc::channel(16);
        let transport = DuplexTransport::new(client_io, events_tx);
        let err = transport.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
