//! Transaction engine: optimistic client mutations dispatched over a
//! [`rc_session::ProtocolSession`], queued FIFO, and requeued across
//! reconnects.

mod engine;
pub mod error;
mod transaction;

pub use engine::TransactionEngine;
pub use error::TxError;
pub use transaction::{ApplyHook, FailedHook, OptimisticHook, Transaction};
