//! Protocol session layer: framing, handshake, and RPC correlation on
//! top of a transport-agnostic byte stream. One [`ProtocolSession`] wraps
//! one [`rc_transport::Transport`] for the lifetime of the connection
//! manager that drives it.

pub mod auth;
mod commands;
pub mod error;
pub mod events;
mod session;

pub use auth::{AuthEvent, AuthProvider};
pub use commands::RpcCallError;
pub use error::SessionError;
pub use events::SessionEvent;
pub use session::ProtocolSession;
