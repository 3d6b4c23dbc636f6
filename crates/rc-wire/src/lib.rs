//! Wire message types and frame codec for the realtime client core.
//!
//! This crate has no knowledge of transports, sessions, or connection
//! state — it only defines what goes over the wire and how to frame it.

pub mod bucket;
pub mod client_msg;
pub mod codec;
pub mod get_updates;
pub mod rpc_error;
pub mod server_msg;
pub mod update;

pub use bucket::{BucketKey, BucketState, PeerId};
pub use client_msg::{ClientBody, ClientMessage};
pub use codec::{FrameError, MAX_FRAME_BYTES};
pub use get_updates::{GetUpdatesInput, GetUpdatesOutput, GetUpdatesResultType};
pub use rpc_error::RpcErrorCode;
pub use server_msg::{ServerBody, ServerProtocolMessage};
pub use update::{Update, UpdateKind};
