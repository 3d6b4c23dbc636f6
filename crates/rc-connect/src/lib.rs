//! Connection manager: the connection state machine that drives a
//! [`rc_session::ProtocolSession`] through dial, handshake, ping-keepalive,
//! backoff, and background-suspend cycles.

pub mod constraints;
pub mod error;
mod manager;
pub mod state;

pub use constraints::Constraints;
pub use error::ConnectError;
pub use manager::ConnectionManager;
pub use state::{ConnectionState, Snapshot, StateReason};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use pretty_assertions::assert_eq;

    use rc_config::ConnectionPolicy;
    use rc_session::{AuthEvent, AuthProvider, ProtocolSession};
    use rc_transport::DuplexTransport;
    use rc_wire::{ClientMessage, ServerBody, ServerProtocolMessage};
    use tokio::sync::{broadcast, mpsc};

    use super::*;

    struct StaticAuth;
    impl AuthProvider for StaticAuth {
        fn token(&self) -> Option<String> {
            Some("tok".into())
        }
        fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
            let (_tx, rx) = broadcast::channel(1);
            rx
        }
    }

    fn fast_policy() -> ConnectionPolicy {
        ConnectionPolicy {
            connect_timeout: Duration::from_millis(200),
            auth_timeout: Duration::from_millis(200),
            ping_interval: Duration::from_millis(200),
            ping_interval_high_latency: Duration::from_millis(500),
            high_latency_threshold: Duration::from_millis(2000),
            ping_timeout: Duration::from_millis(200),
            background_grace: Duration::from_millis(200),
            backoff: |_| Duration::from_millis(50),
        }
    }

    async fn wait_for_state(snapshot_rx: &mut tokio::sync::watch::Receiver<Snapshot>, want: ConnectionState) {
        loop {
            if snapshot_rx.borrow().state == want {
                return;
            }
            snapshot_rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn start_drives_stopped_to_open_on_successful_handshake() {
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let (events_tx, events_rx) = mpsc::channel(64);
        let transport = Arc::new(DuplexTransport::new(client_io, events_tx));
        let session = Arc::new(ProtocolSession::new(transport, events_rx, Arc::new(StaticAuth), 1));

        let manager = ConnectionManager::new(session, fast_policy());
        let mut snapshots = manager.subscribe();

        manager.set_auth_available(true).unwrap();
        manager.set_network_available(true).unwrap();
        manager.start().unwrap();

        wait_for_state(&mut snapshots, ConnectionState::Authenticating).await;
        let _init: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
        rc_wire::codec::send_message(&mut server_io, &ServerProtocolMessage::new(0, ServerBody::ConnectionOpen))
            .await
            .unwrap();

        wait_for_state(&mut snapshots, ConnectionState::Open).await;
        assert_eq!(snapshots.borrow().attempt, 0);
    }

    #[tokio::test]
    async fn transport_disconnect_in_open_enters_backoff_then_reconnects() {
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let (events_tx, events_rx) = mpsc::channel(64);
        let transport = Arc::new(DuplexTransport::new(client_io, events_tx));
        let session = Arc::new(ProtocolSession::new(transport, events_rx, Arc::new(StaticAuth), 1));

        let manager = ConnectionManager::new(session, fast_policy());
        let mut snapshots = manager.subscribe();

        manager.set_auth_available(true).unwrap();
        manager.set_network_available(true).unwrap();
        manager.start().unwrap();

        wait_for_state(&mut snapshots, ConnectionState::Authenticating).await;
        let _init: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
        rc_wire::codec::send_message(&mut server_io, &ServerProtocolMessage::new(0, ServerBody::ConnectionOpen))
            .await
            .unwrap();
        wait_for_state(&mut snapshots, ConnectionState::Open).await;

        drop(server_io);

        wait_for_state(&mut snapshots, ConnectionState::Backoff).await;
        assert_eq!(snapshots.borrow().attempt, 1);
    }

    #[tokio::test]
    async fn losing_network_while_open_moves_to_waiting_for_constraints() {
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let (events_tx, events_rx) = mpsc::channel(64);
        let transport = Arc::new(DuplexTransport::new(client_io, events_tx));
        let session = Arc::new(ProtocolSession::new(transport, events_rx, Arc::new(StaticAuth), 1));

        let manager = ConnectionManager::new(session, fast_policy());
        let mut snapshots = manager.subscribe();

        manager.set_auth_available(true).unwrap();
        manager.set_network_available(true).unwrap();
        manager.start().unwrap();

        wait_for_state(&mut snapshots, ConnectionState::Authenticating).await;
        let _init: ClientMessage = rc_wire::codec::recv_message(&mut server_io).await.unwrap();
        rc_wire::codec::send_message(&mut server_io, &ServerProtocolMessage::new(0, ServerBody::ConnectionOpen))
            .await
            .unwrap();
        wait_for_state(&mut snapshots, ConnectionState::Open).await;

        manager.set_network_available(false).unwrap();
        wait_for_state(&mut snapshots, ConnectionState::WaitingForConstraints).await;
    }
}
