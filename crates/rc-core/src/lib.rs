//! Realtime client core: the facade that wires the connection manager,
//! protocol session, transaction engine, and sync engine into one handle
//! for an embedding application.

mod client;
mod store;

pub use client::RealtimeClient;
pub use store::{InMemoryApplyLog, InMemorySyncStorage};

pub use rc_config::{ApplyError, ApplySource, ApplyUpdates, ConnectionPolicy, StorageError, SyncConfig, SyncStorage};
pub use rc_connect::{ConnectError, ConnectionState, Snapshot};
pub use rc_session::AuthProvider;
pub use rc_sync::{BucketSnapshot, StatsSnapshot};
pub use rc_transport::{Transport, TransportEvent};
pub use rc_txqueue::{Transaction, TxError};
pub use rc_wire::{BucketKey, PeerId, Update, UpdateKind};
