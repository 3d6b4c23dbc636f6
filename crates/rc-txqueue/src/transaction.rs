//! `Transaction<S>`: one optimistic client mutation, generic over the
//! caller's local store handle `S` (the real local database is out of
//! scope here; `S` is whatever cheap, cloneable handle the host app's
//! store exposes).

use uuid::Uuid;

use crate::error::TxError;

pub type OptimisticHook<S> = Box<dyn FnOnce(&S) + Send>;
pub type ApplyHook<S> = Box<dyn FnOnce(&S, serde_json::Value) -> Result<(), String> + Send>;
pub type FailedHook<S> = Box<dyn FnOnce(&S, TxError) + Send>;

/// One optimistic RPC-backed mutation. `random_id` is generated once at
/// construction and resent unchanged on every requeue so the server can
/// deduplicate the at-most-once effect.
pub struct Transaction<S> {
    pub random_id: Uuid,
    pub method: String,
    pub input: serde_json::Value,
    pub optimistic: OptimisticHook<S>,
    pub apply: ApplyHook<S>,
    pub failed: FailedHook<S>,
}

impl<S> Transaction<S> {
    pub fn new(
        method: impl Into<String>,
        input: serde_json::Value,
        optimistic: OptimisticHook<S>,
        apply: ApplyHook<S>,
        failed: FailedHook<S>,
    ) -> Self {
        Self {
            random_id: Uuid::new_v4(),
            method: method.into(),
            input,
            optimistic,
            apply,
            failed,
        }
    }

    /// The input payload sent to the server, with `randomId` merged in so
    /// replays carry the same value.
    pub(crate) fn wire_input(&self) -> serde_json::Value {
        let mut input = self.input.clone();
        if let serde_json::Value::Object(ref mut map) = input {
            map.insert("randomId".to_string(), serde_json::Value::String(self.random_id.to_string()));
        }
        input
    }
}
