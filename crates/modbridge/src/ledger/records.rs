//! Ledger record types.

use crate::automod::SpamCategory;
use crate::forum::ForumPost;
use crate::wiki::WikiAccountRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Decision recorded on a resolved item. Stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModAction {
    Denied = 0,
    Approved = 1,
    Banned = 2,
}

impl ModAction {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::Denied),
            1 => Some(Self::Approved),
            2 => Some(Self::Banned),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Denied => "denied",
            Self::Approved => "approved",
            Self::Banned => "banned",
        }
    }
}

impl fmt::Display for ModAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Who acted on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moderator {
    pub id: u64,
    pub name: String,
}

impl Moderator {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Where a record's card lives in chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLink {
    pub message_id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub at: DateTime<Utc>,
    pub action: ModAction,
    pub by: Moderator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualReview {
    pub at: DateTime<Utc>,
    pub by: Moderator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRequestRecord {
    pub id: i64,
    pub request: WikiAccountRequest,
    pub chat: Option<ChatLink>,
    pub time_created: DateTime<Utc>,
    pub resolution: Option<Resolution>,
    /// Empty unless automod flagged the request.
    pub spam_categories: BTreeSet<SpamCategory>,
    pub manual_review: Option<ManualReview>,
}

impl AccountRequestRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn is_flagged(&self) -> bool {
        !self.spam_categories.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumPostRecord {
    pub id: i64,
    pub post: ForumPost,
    pub chat: Option<ChatLink>,
    pub time_created: DateTime<Utc>,
    pub resolution: Option<Resolution>,
}

impl ForumPostRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}
