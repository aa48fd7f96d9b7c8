//! Durable moderation ledger backed by SQLite.
//!
//! One row per upstream item, keyed by its platform-native id. Rows are
//! created by reconciliation, resolved by the dispatcher, and deleted only
//! when the item disappears from the upstream queue unresolved.
//!
//! Timestamps are stored as RFC 3339 text with second precision so that
//! string comparison orders them.

mod accounts;
mod posts;
pub mod records;

pub use records::{
    AccountRequestRecord, ChatLink, ForumPostRecord, ManualReview, ModAction, Moderator,
    Resolution,
};

use crate::error::BridgeResult;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS wiki_account_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    acrid INTEGER NOT NULL UNIQUE,
    source_ref TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    username TEXT NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    biography TEXT NOT NULL,
    chat_message_id INTEGER,
    chat_channel_id INTEGER,
    chat_guild_id INTEGER,
    time_created TEXT NOT NULL,
    time_resolved TEXT,
    action INTEGER,
    handled_by_id INTEGER,
    handled_by_name TEXT,
    spam_categories TEXT NOT NULL DEFAULT '',
    manual_review_set_at TEXT,
    manual_review_by_id INTEGER,
    manual_review_by_name TEXT
);
CREATE INDEX IF NOT EXISTS idx_wiki_chat_message
    ON wiki_account_requests (chat_message_id);

CREATE TABLE IF NOT EXISTS forum_post_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id INTEGER NOT NULL UNIQUE,
    is_for_new_topic INTEGER NOT NULL,
    topic_name TEXT NOT NULL,
    topic_url TEXT NOT NULL,
    forum_name TEXT NOT NULL,
    forum_url TEXT NOT NULL,
    author_name TEXT NOT NULL,
    author_url TEXT NOT NULL,
    author_id INTEGER NOT NULL,
    post_time TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    ip_hostname TEXT,
    ip_location TEXT NOT NULL,
    ip_organization TEXT NOT NULL,
    post_text TEXT NOT NULL,
    author_join_date TEXT,
    author_warning_count INTEGER NOT NULL,
    author_post_count INTEGER NOT NULL,
    author_groups TEXT NOT NULL,
    last_approved_post_date TEXT,
    chat_message_id INTEGER,
    chat_channel_id INTEGER,
    chat_guild_id INTEGER,
    time_created TEXT NOT NULL,
    time_resolved TEXT,
    action INTEGER,
    handled_by_id INTEGER,
    handled_by_name TEXT
);
CREATE INDEX IF NOT EXISTS idx_forum_chat_message
    ON forum_post_requests (chat_message_id);
";

/// SQLite-backed record store shared by every task in the process.
pub struct Ledger {
    db: Mutex<Connection>,
}

impl Ledger {
    /// Open or create the ledger at `path`.
    pub fn open(path: &Path) -> BridgeResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        Self::init(db)
    }

    /// Ledger that lives only as long as the process.
    pub fn open_in_memory() -> BridgeResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> BridgeResult<Self> {
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Column codecs ──────────────────────────────────────────────

pub(crate) fn fmt_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn time_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

pub(crate) fn opt_time_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_time(idx, &raw)).transpose()
}

pub(crate) fn id_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)? as u64)
}

pub(crate) fn opt_id_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|id| id as u64))
}

/// Chat link from three consecutive columns starting at `idx`.
pub(crate) fn chat_cols(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<ChatLink>> {
    let message_id = opt_id_col(row, idx)?;
    let channel_id = opt_id_col(row, idx + 1)?;
    let guild_id = opt_id_col(row, idx + 2)?;
    Ok(match (message_id, channel_id) {
        (Some(message_id), Some(channel_id)) => Some(ChatLink {
            message_id,
            channel_id,
            guild_id,
        }),
        _ => None,
    })
}

/// Resolution from `time_resolved, action, handled_by_id, handled_by_name`
/// starting at `idx`.
pub(crate) fn resolution_cols(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<Resolution>> {
    let Some(at) = opt_time_col(row, idx)? else {
        return Ok(None);
    };
    let raw_action: Option<i64> = row.get(idx + 1)?;
    let action = match raw_action {
        Some(raw) => ModAction::from_i64(raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx + 1,
                Type::Integer,
                format!("unknown action code {raw}").into(),
            )
        })?,
        None => ModAction::Denied,
    };
    let by = Moderator {
        id: opt_id_col(row, idx + 2)?.unwrap_or_default(),
        name: row.get::<_, Option<String>>(idx + 3)?.unwrap_or_default(),
    };
    Ok(Some(Resolution { at, action, by }))
}

pub(crate) fn sql_id(id: u64) -> i64 {
    id as i64
}

/// `rusqlite` "no rows" as `None`.
pub(crate) fn optional<T>(result: rusqlite::Result<T>) -> BridgeResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
