//! `GetUpdates` RPC contract used for per-bucket catch-up.

use serde::{Deserialize, Serialize};

use crate::bucket::BucketKey;
use crate::update::Update;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetUpdatesInput {
    pub bucket: BucketKey,
    pub start_seq: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_limit: Option<i32>,
}

impl GetUpdatesInput {
    pub fn new(bucket: BucketKey, start_seq: i64) -> Self {
        Self {
            bucket,
            start_seq,
            seq_end: None,
            total_limit: None,
        }
    }

    pub fn with_seq_end(mut self, seq_end: i64) -> Self {
        self.seq_end = Some(seq_end);
        self
    }

    pub fn with_total_limit(mut self, total_limit: i32) -> Self {
        self.total_limit = Some(total_limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GetUpdatesResultType {
    Ok,
    TooLong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetUpdatesOutput {
    pub seq: i64,
    pub date: i64,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub result_type: GetUpdatesResultType,
    #[serde(default)]
    pub updates: Vec<Update>,
}

impl GetUpdatesOutput {
    pub fn is_too_long(&self) -> bool {
        self.result_type == GetUpdatesResultType::TooLong
    }
}
