//! `forum_post_requests` queries.

use super::{
    chat_cols, fmt_time, id_col, opt_time_col, optional, resolution_cols, sql_id, time_col,
    ChatLink, ForumPostRecord, Ledger, ModAction, Moderator,
};
use crate::error::BridgeResult;
use crate::forum::{AuthorStats, ForumPost, QueueMode};
use crate::geo::IpDetails;
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::collections::HashSet;

const COLUMNS: &str = "id, post_id, is_for_new_topic, topic_name, topic_url, forum_name, forum_url,
    author_name, author_url, author_id, post_time,
    ip_address, ip_hostname, ip_location, ip_organization, post_text,
    author_join_date, author_warning_count, author_post_count, author_groups,
    last_approved_post_date,
    chat_message_id, chat_channel_id, chat_guild_id, time_created,
    time_resolved, action, handled_by_id, handled_by_name";

fn post_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ForumPostRecord> {
    let post = ForumPost {
        post_id: id_col(row, 1)?,
        mode: QueueMode::from_new_topic_flag(row.get(2)?),
        topic_name: row.get(3)?,
        topic_url: row.get(4)?,
        forum_name: row.get(5)?,
        forum_url: row.get(6)?,
        author_name: row.get(7)?,
        author_url: row.get(8)?,
        author_id: id_col(row, 9)?,
        post_time: time_col(row, 10)?,
        ip: IpDetails {
            address: row.get(11)?,
            hostname: row.get(12)?,
            location: row.get(13)?,
            organization: row.get(14)?,
        },
        post_text: row.get(15)?,
        author: AuthorStats {
            join_date: opt_time_col(row, 16)?,
            warning_count: row.get(17)?,
            post_count: row.get(18)?,
            groups: row.get(19)?,
        },
        last_approved_post_date: opt_time_col(row, 20)?,
    };

    Ok(ForumPostRecord {
        id: row.get(0)?,
        post,
        chat: chat_cols(row, 21)?,
        time_created: time_col(row, 24)?,
        resolution: resolution_cols(row, 25)?,
    })
}

impl Ledger {
    pub fn insert_post(
        &self,
        post: &ForumPost,
        chat: ChatLink,
        now: DateTime<Utc>,
    ) -> BridgeResult<i64> {
        let db = self.conn();
        db.execute(
            "INSERT INTO forum_post_requests (
                post_id, is_for_new_topic, topic_name, topic_url, forum_name, forum_url,
                author_name, author_url, author_id, post_time,
                ip_address, ip_hostname, ip_location, ip_organization, post_text,
                author_join_date, author_warning_count, author_post_count, author_groups,
                last_approved_post_date,
                chat_message_id, chat_channel_id, chat_guild_id, time_created
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                       ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
            params![
                sql_id(post.post_id),
                post.mode.is_for_new_topic(),
                post.topic_name,
                post.topic_url,
                post.forum_name,
                post.forum_url,
                post.author_name,
                post.author_url,
                sql_id(post.author_id),
                fmt_time(post.post_time),
                post.ip.address,
                post.ip.hostname,
                post.ip.location,
                post.ip.organization,
                post.post_text,
                post.author.join_date.map(fmt_time),
                post.author.warning_count,
                post.author.post_count,
                post.author.groups,
                post.last_approved_post_date.map(fmt_time),
                sql_id(chat.message_id),
                sql_id(chat.channel_id),
                chat.guild_id.map(sql_id),
                fmt_time(now),
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn post_by_message(&self, message_id: u64) -> BridgeResult<Option<ForumPostRecord>> {
        let db = self.conn();
        optional(db.query_row(
            &format!("SELECT {COLUMNS} FROM forum_post_requests WHERE chat_message_id = ?1"),
            params![sql_id(message_id)],
            post_row,
        ))
    }

    pub fn post_by_post_id(&self, post_id: u64) -> BridgeResult<Option<ForumPostRecord>> {
        let db = self.conn();
        optional(db.query_row(
            &format!("SELECT {COLUMNS} FROM forum_post_requests WHERE post_id = ?1"),
            params![sql_id(post_id)],
            post_row,
        ))
    }

    /// Post ids of one queue that already have a decision.
    pub fn resolved_post_ids(&self, mode: QueueMode) -> BridgeResult<HashSet<u64>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT post_id FROM forum_post_requests
             WHERE time_resolved IS NOT NULL AND is_for_new_topic = ?1",
        )?;
        let rows = stmt.query_map(params![mode.is_for_new_topic()], |row| id_col(row, 0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    /// Unresolved posts of one queue that are no longer pending upstream.
    pub fn unresolved_posts_absent_from(
        &self,
        mode: QueueMode,
        pending: &HashSet<u64>,
    ) -> BridgeResult<Vec<ForumPostRecord>> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM forum_post_requests
             WHERE time_resolved IS NULL AND is_for_new_topic = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![mode.is_for_new_topic()], post_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records
            .into_iter()
            .filter(|record| !pending.contains(&record.post.post_id))
            .collect())
    }

    /// Resolve a post if nobody has yet. Returns whether this call won.
    pub fn resolve_post(
        &self,
        id: i64,
        action: ModAction,
        by: &Moderator,
        at: DateTime<Utc>,
    ) -> BridgeResult<bool> {
        let changed = self.conn().execute(
            "UPDATE forum_post_requests
             SET time_resolved = ?2, action = ?3, handled_by_id = ?4, handled_by_name = ?5
             WHERE id = ?1 AND time_resolved IS NULL",
            params![id, fmt_time(at), action.as_i64(), sql_id(by.id), by.name],
        )?;
        Ok(changed == 1)
    }

    /// Upgrade a denied post to banned once the author ban went through.
    pub fn mark_post_banned(&self, id: i64) -> BridgeResult<bool> {
        let changed = self.conn().execute(
            "UPDATE forum_post_requests SET action = ?2
             WHERE id = ?1 AND time_resolved IS NOT NULL",
            params![id, ModAction::Banned.as_i64()],
        )?;
        Ok(changed == 1)
    }

    pub fn set_post_chat_link(&self, id: i64, chat: ChatLink) -> BridgeResult<()> {
        self.conn().execute(
            "UPDATE forum_post_requests
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
    pub fn clear_post_chat_link(&self, id: i64) -> BridgeResult<()> {
        self.conn().execute(
            "UPDATE forum_post_requests
             SET chat_message_id = NULL, chat_channel_id = NULL, chat_guild_id = NULL
             WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn delete_post(&self, id: i64) -> BridgeResult<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM forum_post_requests WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}
