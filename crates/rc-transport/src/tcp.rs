//! A real `tokio::net::TcpStream`-based transport.
//!
//! TLS/WebSocket negotiation is left to whatever the caller dials with —
//! the mobile and desktop surfaces that wrap this differ in that regard,
//! and that surface is out of scope here. `connect` takes a
//! plain `host:port`; wrap it at a higher layer if TLS is needed.

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::{read_loop, Transport, TransportError, TransportEvent};

pub struct TcpTransport {
    addr: String,
    events_tx: mpsc::Sender<TransportEvent>,
    write_half: Arc<Mutex<Option<OwnedWriteHalf>>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, events_tx: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            addr: addr.into(),
            events_tx,
            write_half: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) {
        let _ = self.events_tx.send(TransportEvent::Connecting).await;
        debug!(addr = %self.addr, "dialing transport");
        match TcpStream::connect(&self.addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                let (read_half, write_half) = stream.into_split();
                *self.write_half.lock().await = Some(write_half);
                let _ = self.events_tx.send(TransportEvent::Connected).await;
                tokio::spawn(read_loop(read_half, self.events_tx.clone()));
            }
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "transport connect failed");
                let _ = self
                    .events_tx
                    .send(TransportEvent::Disconnected(Some(e.to_string())))
                    .await;
            }
        }
    }

    async fn disconnect(&self) {
        use tokio::io::AsyncWriteExt;
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
