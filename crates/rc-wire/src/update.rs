//! The server push payload: `Update` and its ~20 variants.
//!
//! Local store schemas are out of scope, so most
//! variants carry the identifiers needed for routing plus an opaque
//! `serde_json::Value` body for the collaborator-defined payload shape.

use serde::{Deserialize, Serialize};

use crate::bucket::{BucketKey, PeerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UpdateKind {
    NewMessage { chat_id: i64, message: serde_json::Value },
    EditMessage { chat_id: i64, message_id: i64, message: serde_json::Value },
    DeleteMessages { chat_id: i64, message_ids: Vec<i64> },
    MessageAttachment { chat_id: i64, message_id: i64, attachment: serde_json::Value },
    UpdateReaction { chat_id: i64, message_id: i64, reaction: serde_json::Value },
    DeleteReaction { chat_id: i64, message_id: i64, reaction_id: i64 },
    NewChat { chat: serde_json::Value },
    DeleteChat { chat_id: i64 },
    ChatVisibility { chat_id: i64, visible: bool },
    ChatInfo { chat_id: i64, info: serde_json::Value },
    ParticipantAdd { chat_id: i64, user_id: i64 },
    ParticipantDelete { chat_id: i64, user_id: i64 },
    SpaceMemberAdd { space_id: i64, member: serde_json::Value },
    SpaceMemberDelete { space_id: i64, user_id: i64 },
    SpaceMemberUpdate { space_id: i64, member: serde_json::Value },
    JoinSpace { space_id: i64 },
    UpdateUserStatus { user_id: i64, status: serde_json::Value },
    UpdateUserSettings { settings: serde_json::Value },
    DialogArchived { peer: PeerId, archived: bool },
    PinnedMessages { chat_id: i64, message_ids: Vec<i64> },
    MarkAsUnread { peer: PeerId, unread: bool },
    UpdateReadMaxId { peer: PeerId, max_id: i64 },
    NewMessageNotification { chat_id: i64, message_id: i64 },
    /// Notification, not a direct update: the bucket has updates beyond
    /// `seq` that must be fetched via `GetUpdates`, not applied in place.
    ChatHasNewUpdates { chat_id: i64, seq: i32 },
    /// Same as `ChatHasNewUpdates` but for a space bucket.
    SpaceHasNewUpdates { space_id: i64, seq: i32 },
}

impl UpdateKind {
    /// Notifications trigger a bucket fetch; they are never applied directly.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            UpdateKind::ChatHasNewUpdates { .. } | UpdateKind::SpaceHasNewUpdates { .. }
        )
    }

    /// The bucket this update belongs to, if it can be determined from the
    /// payload alone (message-level updates carry a `chat_id`; dialog-level
    /// updates carry a `peer`).
    pub fn bucket_key(&self) -> Option<BucketKey> {
        use UpdateKind::*;
        match self {
            NewMessage { chat_id, .. }
            | EditMessage { chat_id, .. }
            | DeleteMessages { chat_id, .. }
            | MessageAttachment { chat_id, .. }
            | UpdateReaction { chat_id, .. }
            | DeleteReaction { chat_id, .. }
            | DeleteChat { chat_id }
            | ChatVisibility { chat_id, .. }
            | ChatInfo { chat_id, .. }
            | ParticipantAdd { chat_id, .. }
            | ParticipantDelete { chat_id, .. }
            | PinnedMessages { chat_id, .. }
            | NewMessageNotification { chat_id, .. }
            | ChatHasNewUpdates { chat_id, .. } => {
                Some(BucketKey::chat(PeerId::User(*chat_id)))
            }
            SpaceMemberAdd { space_id, .. }
            | SpaceMemberDelete { space_id, .. }
            | SpaceMemberUpdate { space_id, .. }
            | JoinSpace { space_id }
            | SpaceHasNewUpdates { space_id, .. } => Some(BucketKey::space(*space_id)),
            DialogArchived { peer, .. } | MarkAsUnread { peer, .. } | UpdateReadMaxId { peer, .. } => {
                Some(BucketKey::Chat { peer: *peer })
            }
            NewChat { .. } | UpdateUserStatus { .. } | UpdateUserSettings { .. } => {
                Some(BucketKey::User)
            }
        }
    }

    /// Whether this variant is safe to apply during bucket catch-up.
    ///
    /// Catch-up is restricted to structural consistency: membership,
    /// metadata, pins, archive state, and bulk deletions. Messages/edits are
    /// included only when `enable_message_updates` is on.
    pub fn in_catchup_whitelist(&self, enable_message_updates: bool) -> bool {
        use UpdateKind::*;
        match self {
            SpaceMemberAdd { .. }
            | SpaceMemberDelete { .. }
            | SpaceMemberUpdate { .. }
            | JoinSpace { .. }
            | ParticipantAdd { .. }
            | ParticipantDelete { .. }
            | ChatVisibility { .. }
            | ChatInfo { .. }
            | DeleteChat { .. }
            | PinnedMessages { .. }
            | DialogArchived { .. }
            | DeleteMessages { .. } => true,
            NewMessage { .. } | EditMessage { .. } | MessageAttachment { .. } => {
                enable_message_updates
            }
            // Everything else (reactions, presence, settings, read state,
            // transient notifications) is dropped during catch-up — it isn't
            // structural and re-streaming it would defeat the point of
            // restricting catch-up in the first place.
            _ => false,
        }
    }
}

/// A single pushed update: carries its bucket position (`seq`/`date`) plus
/// the payload variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub seq: Option<i32>,
    pub date: Option<i64>,
    #[serde(flatten)]
    pub kind: UpdateKind,
}

impl Update {
    pub fn is_notification(&self) -> bool {
        self.kind.is_notification()
    }

    pub fn bucket_key(&self) -> Option<BucketKey> {
        self.kind.bucket_key()
    }
}
