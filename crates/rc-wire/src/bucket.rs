//! Bucket identity — the scope a monotonic update `seq` is counted within.

use serde::{Deserialize, Serialize};

/// The other side of a chat bucket: either a user or a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeerId {
    User(i64),
    Thread(i64),
}

/// Identifies a scope of the monotonic update sequence: a chat, a space, or
/// the user's own account-wide bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BucketKey {
    Chat { peer: PeerId },
    Space { id: i64 },
    User,
}

impl BucketKey {
    pub fn chat(peer: PeerId) -> Self {
        BucketKey::Chat { peer }
    }

    pub fn space(id: i64) -> Self {
        BucketKey::Space { id }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BucketKey::Chat { peer: PeerId::User(id) } => write!(f, "chat:user:{id}"),
            BucketKey::Chat { peer: PeerId::Thread(id) } => write!(f, "chat:thread:{id}"),
            BucketKey::Space { id } => write!(f, "space:{id}"),
            BucketKey::User => write!(f, "user"),
        }
    }
}

/// `{seq, date}` persisted per bucket: the greatest applied seq and the date
/// of that update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BucketState {
    pub seq: i64,
    pub date: i64,
}

impl BucketState {
    pub fn is_cold_start(&self) -> bool {
        self.seq == 0 || self.date == 0
    }
}
