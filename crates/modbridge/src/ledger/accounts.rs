//! `wiki_account_requests` queries.

use super::{
    chat_cols, fmt_time, id_col, opt_id_col, opt_time_col, optional, resolution_cols, sql_id,
    time_col, AccountRequestRecord, ChatLink, Ledger, ManualReview, ModAction, Moderator,
};
use crate::automod::{self, SpamCategory};
use crate::error::BridgeResult;
use crate::wiki::WikiAccountRequest;
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::collections::{BTreeSet, HashSet};

const COLUMNS: &str = "id, acrid, source_ref, requested_at, username, name, email, biography,
    chat_message_id, chat_channel_id, chat_guild_id, time_created,
    time_resolved, action, handled_by_id, handled_by_name,
    spam_categories, manual_review_set_at, manual_review_by_id, manual_review_by_name";

fn account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRequestRecord> {
    let request = WikiAccountRequest {
        acrid: id_col(row, 1)?,
        source_ref: row.get(2)?,
        requested_at: time_col(row, 3)?,
        username: row.get(4)?,
        name: row.get(5)?,
        email: row.get(6)?,
        biography: row.get(7)?,
    };
    let categories: String = row.get(16)?;
    let manual_review = match opt_time_col(row, 17)? {
        Some(at) => Some(ManualReview {
            at,
            by: Moderator {
                id: opt_id_col(row, 18)?.unwrap_or_default(),
                name: row.get::<_, Option<String>>(19)?.unwrap_or_default(),
            },
        }),
        None => None,
    };

    Ok(AccountRequestRecord {
        id: row.get(0)?,
        request,
        chat: chat_cols(row, 8)?,
        time_created: time_col(row, 11)?,
        resolution: resolution_cols(row, 12)?,
        spam_categories: automod::parse_categories(&categories),
        manual_review,
    })
}

impl Ledger {
    /// Record a newly seen request. `chat` is `None` for automod-flagged
    /// requests, which get no card. `created` is what the automod grace
    /// period counts from.
    pub fn insert_account(
        &self,
        request: &WikiAccountRequest,
        chat: Option<ChatLink>,
        spam_categories: &BTreeSet<SpamCategory>,
        created: DateTime<Utc>,
    ) -> BridgeResult<i64> {
        let db = self.conn();
        db.execute(
            "INSERT INTO wiki_account_requests (
                acrid, source_ref, requested_at, username, name, email, biography,
                chat_message_id, chat_channel_id, chat_guild_id, time_created, spam_categories
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                sql_id(request.acrid),
                request.source_ref,
                fmt_time(request.requested_at),
                request.username,
                request.name,
                request.email,
                request.biography,
                chat.map(|c| sql_id(c.message_id)),
                chat.map(|c| sql_id(c.channel_id)),
                chat.and_then(|c| c.guild_id).map(sql_id),
                fmt_time(created),
                automod::join_categories(spam_categories),
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn account_by_message(&self, message_id: u64) -> BridgeResult<Option<AccountRequestRecord>> {
        let db = self.conn();
        optional(db.query_row(
            &format!("SELECT {COLUMNS} FROM wiki_account_requests WHERE chat_message_id = ?1"),
            params![sql_id(message_id)],
            account_row,
        ))
    }

    pub fn account_by_acrid(&self, acrid: u64) -> BridgeResult<Option<AccountRequestRecord>> {
        let db = self.conn();
        optional(db.query_row(
            &format!("SELECT {COLUMNS} FROM wiki_account_requests WHERE acrid = ?1"),
            params![sql_id(acrid)],
            account_row,
        ))
    }

    pub fn account(&self, id: i64) -> BridgeResult<Option<AccountRequestRecord>> {
        let db = self.conn();
        optional(db.query_row(
            &format!("SELECT {COLUMNS} FROM wiki_account_requests WHERE id = ?1"),
            params![id],
            account_row,
        ))
    }

    fn account_query(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> BridgeResult<Vec<AccountRequestRecord>> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM wiki_account_requests WHERE {filter} ORDER BY id"
        ))?;
        let rows = stmt.query_map(args, account_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn acrid_query(&self, filter: &str) -> BridgeResult<HashSet<u64>> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT acrid FROM wiki_account_requests WHERE {filter}"
        ))?;
        let rows = stmt.query_map([], |row| id_col(row, 0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    /// Requests automod flagged, resolved or not.
    pub fn flagged_acrids(&self) -> BridgeResult<HashSet<u64>> {
        self.acrid_query("spam_categories != ''")
    }

    pub fn resolved_acrids(&self) -> BridgeResult<HashSet<u64>> {
        self.acrid_query("time_resolved IS NOT NULL")
    }

    /// Unresolved requests that are no longer in the upstream queue.
    pub fn unresolved_accounts_absent_from(
        &self,
        pending: &HashSet<u64>,
    ) -> BridgeResult<Vec<AccountRequestRecord>> {
        Ok(self
            .account_query("time_resolved IS NULL", [])?
            .into_iter()
            .filter(|record| !pending.contains(&record.request.acrid))
            .collect())
    }

    /// Flagged requests old enough for the automatic deny: unresolved, not
    /// escalated, created before `cutoff`.
    pub fn automod_due(&self, cutoff: DateTime<Utc>) -> BridgeResult<Vec<AccountRequestRecord>> {
        self.account_query(
            "spam_categories != '' AND time_resolved IS NULL
             AND manual_review_set_at IS NULL AND time_created < ?1",
            params![fmt_time(cutoff)],
        )
    }

    /// Resolved flagged requests with the given action.
    pub fn flagged_accounts_resolved_as(
        &self,
        action: ModAction,
    ) -> BridgeResult<Vec<AccountRequestRecord>> {
        self.account_query(
            "spam_categories != '' AND time_resolved IS NOT NULL AND action = ?1",
            params![action.as_i64()],
        )
    }

    /// Resolve a request if nobody has yet. Returns whether this call won.
    pub fn resolve_account(
        &self,
        id: i64,
        action: ModAction,
        by: &Moderator,
        at: DateTime<Utc>,
    ) -> BridgeResult<bool> {
        let changed = self.conn().execute(
            "UPDATE wiki_account_requests
             SET time_resolved = ?2, action = ?3, handled_by_id = ?4, handled_by_name = ?5
             WHERE id = ?1 AND time_resolved IS NULL",
            params![id, fmt_time(at), action.as_i64(), sql_id(by.id), by.name],
        )?;
        Ok(changed == 1)
    }

    /// Escalate a request to manual review if it is still open and not
    /// already escalated. Returns whether this call won.
    pub fn set_manual_review(
        &self,
        id: i64,
        by: &Moderator,
        at: DateTime<Utc>,
    ) -> BridgeResult<bool> {
        let changed = self.conn().execute(
            "UPDATE wiki_account_requests
             SET manual_review_set_at = ?2, manual_review_by_id = ?3, manual_review_by_name = ?4
             WHERE id = ?1 AND time_resolved IS NULL AND manual_review_set_at IS NULL",
            params![id, fmt_time(at), sql_id(by.id), by.name],
        )?;
        Ok(changed == 1)
    }

    pub fn set_account_chat_link(&self, id: i64, chat: ChatLink) -> BridgeResult<()> {
        self.conn().execute(
            "UPDATE wiki_account_requests
             SET chat_message_id = ?2, chat_channel_id = ?3, chat_guild_id = ?4
             WHERE id = ?1",
            params![
                id,
                sql_id(chat.message_id),
                sql_id(chat.channel_id),
                chat.guild_id.map(sql_id)
            ],
        )?;
        Ok(())
    }

    /// Forget the card of a record whose message is gone.
    pub fn clear_account_chat_link(&self, id: i64) -> BridgeResult<()> {
        self.conn().execute(
            "UPDATE wiki_account_requests
             SET chat_message_id = NULL, chat_channel_id = NULL, chat_guild_id = NULL
             WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn delete_account(&self, id: i64) -> BridgeResult<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM wiki_account_requests WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}
