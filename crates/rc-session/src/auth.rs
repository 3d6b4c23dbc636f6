//! The auth collaborator a protocol session (and, transitively, the
//! connection manager) observes but never manages directly.

use tokio::sync::broadcast;

/// Login-state transitions the host application's auth layer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn,
    LoggedOut,
}

/// Read-only view onto the host application's auth state. The session asks
/// for the current token at handshake time and subscribes for later
/// changes; it never requests a login or holds credentials itself.
pub trait AuthProvider: Send + Sync {
    /// The bearer token to present in `connectionInit`, if any.
    fn token(&self) -> Option<String>;

    fn is_logged_in(&self) -> bool {
        self.token().is_some()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
