//! Action dispatcher: applies a moderator decision exactly once.
//!
//! Each call takes the moderation lock, looks the card up in the ledger,
//! replays the decision upstream, and only then marks the record resolved
//! with a conditional update. An upstream failure leaves the record open
//! so the card stays actionable.

use crate::chat::{delete_if_present, notify};
use crate::error::BridgeResult;
use crate::forum::{ForumBackend, ForumDecision, RejectionReason};
use crate::ledger::{AccountRequestRecord, ForumPostRecord, ModAction, Moderator};
use crate::reconcile::BridgeContext;
use crate::wiki::WikiBackend;
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// No ledger record for the card.
    NotFound,
    /// Someone else resolved it first.
    AlreadyResolved,
    UpstreamError(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

fn verb(approved: bool) -> &'static str {
    if approved {
        "approved"
    } else {
        "denied"
    }
}

// ── Wiki ───────────────────────────────────────────────────────

pub struct WikiDispatcher {
    ctx: BridgeContext,
    wiki: Arc<dyn WikiBackend>,
}

impl WikiDispatcher {
    pub fn new(ctx: BridgeContext, wiki: Arc<dyn WikiBackend>) -> Self {
        Self { ctx, wiki }
    }

    pub fn context(&self) -> &BridgeContext {
        &self.ctx
    }

    pub fn request_url(&self, acrid: u64) -> String {
        self.wiki.request_url(acrid)
    }

    /// Resolve the account request behind a card.
    pub async fn resolve(
        &self,
        message_id: u64,
        approved: bool,
        reviewer: &Moderator,
    ) -> BridgeResult<Outcome> {
        let _guard = self.ctx.lock.lock().await;

        let Some(record) = self.ctx.ledger.account_by_message(message_id)? else {
            tracing::warn!("no account request for message {message_id}");
            notify(
                self.ctx.chat.as_ref(),
                self.ctx.channels.debug,
                &format!(
                    "handle_mediawiki_account: Unable to find request for {message_id}. \
                     Received by {}.",
                    reviewer.name
                ),
            )
            .await;
            return Ok(Outcome::NotFound);
        };

        self.resolve_record(&record, approved, reviewer).await
    }

    /// Resolve a known record. The caller must hold the moderation lock.
    pub(crate) async fn resolve_record(
        &self,
        record: &AccountRequestRecord,
        approved: bool,
        reviewer: &Moderator,
    ) -> BridgeResult<Outcome> {
        if record.is_resolved() {
            return Ok(Outcome::AlreadyResolved);
        }

        let acrid = record.request.acrid;
        if let Err(e) = self.wiki.moderate(&record.request, approved).await {
            tracing::warn!("wiki replay for request {acrid} failed: {e}");
            notify(
                self.ctx.chat.as_ref(),
                self.ctx.channels.debug,
                "Failed to process mediawiki account confirmation",
            )
            .await;
            return Ok(Outcome::UpstreamError(e.to_string()));
        }

        let action = if approved {
            ModAction::Approved
        } else {
            ModAction::Denied
        };
        if !self
            .ctx
            .ledger
            .resolve_account(record.id, action, reviewer, Utc::now())?
        {
            return Ok(Outcome::AlreadyResolved);
        }

        if let Some(chat) = record.chat {
            if let Err(e) =
                delete_if_present(self.ctx.chat.as_ref(), chat.channel_id, chat.message_id).await
            {
                tracing::warn!("failed to remove card for request {acrid}: {e}");
            }
        }

        let line = format!(
            "Wiki account for {} {} by {}",
            record.request.username,
            verb(approved),
            reviewer.name
        );
        tracing::info!("{line}");
        notify(self.ctx.chat.as_ref(), self.ctx.channels.wiki_logs, &line).await;
        Ok(Outcome::Success)
    }
}

// ── Forum ──────────────────────────────────────────────────────

pub struct ForumDispatcher {
    ctx: BridgeContext,
    forum: Arc<dyn ForumBackend>,
    log_channel: u64,
}

impl ForumDispatcher {
    pub fn new(ctx: BridgeContext, forum: Arc<dyn ForumBackend>, log_channel: u64) -> Self {
        Self {
            ctx,
            forum,
            log_channel,
        }
    }

    async fn find(
        &self,
        message_id: u64,
        reviewer: &Moderator,
        caller: &str,
    ) -> BridgeResult<Option<ForumPostRecord>> {
        let record = self.ctx.ledger.post_by_message(message_id)?;
        if record.is_none() {
            tracing::warn!("no forum post for message {message_id}");
            notify(
                self.ctx.chat.as_ref(),
                self.ctx.channels.debug,
                &format!(
                    "{caller}: Unable to find request for {message_id}. Received by {}.",
                    reviewer.name
                ),
            )
            .await;
        }
        Ok(record)
    }

    /// Approve or disapprove the post behind a card.
    pub async fn resolve(
        &self,
        message_id: u64,
        decision: &ForumDecision,
        reviewer: &Moderator,
    ) -> BridgeResult<Outcome> {
        let _guard = self.ctx.lock.lock().await;
        let Some(record) = self.find(message_id, reviewer, "handle_forum_post").await? else {
            return Ok(Outcome::NotFound);
        };
        self.apply(&record, decision, reviewer).await
    }

    /// Disapprove the post, then ban its author. The ban is only attempted
    /// when the disapproval went through.
    pub async fn deny_and_ban(
        &self,
        message_id: u64,
        reason: RejectionReason,
        public_reason: &str,
        reviewer: &Moderator,
    ) -> BridgeResult<Outcome> {
        let _guard = self.ctx.lock.lock().await;
        let Some(record) = self.find(message_id, reviewer, "handle_forum_ban").await? else {
            return Ok(Outcome::NotFound);
        };

        let decision = ForumDecision::Deny {
            reason,
            message: String::new(),
        };
        let denied = self.apply(&record, &decision, reviewer).await?;
        if !denied.is_success() {
            return Ok(denied);
        }

        let author = &record.post.author_name;
        if let Err(e) = self
            .forum
            .ban_user(record.post.author_id, &reviewer.name, public_reason)
            .await
        {
            tracing::warn!("ban of forum user {author} failed: {e}");
            notify(
                self.ctx.chat.as_ref(),
                self.ctx.channels.debug,
                &format!("Failed to apply forum ban for {author}"),
            )
            .await;
            return Ok(Outcome::UpstreamError(e.to_string()));
        }

        self.ctx.ledger.mark_post_banned(record.id)?;
        let line = format!("PHPBB user {author} has been banned by {}", reviewer.name);
        tracing::info!("{line}");
        notify(self.ctx.chat.as_ref(), self.log_channel, &line).await;
        Ok(Outcome::Success)
    }

    async fn apply(
        &self,
        record: &ForumPostRecord,
        decision: &ForumDecision,
        reviewer: &Moderator,
    ) -> BridgeResult<Outcome> {
        if record.is_resolved() {
            return Ok(Outcome::AlreadyResolved);
        }

        let post = &record.post;
        if let Err(e) = self.forum.moderate(post.post_id, decision).await {
            tracing::warn!("forum replay for post {} failed: {e}", post.post_id);
            notify(
                self.ctx.chat.as_ref(),
                self.ctx.channels.debug,
                &format!("Failed to moderate PHPBB {} {}: {e}", post.mode, post.post_id),
            )
            .await;
            return Ok(Outcome::UpstreamError(e.to_string()));
        }

        let approved = decision.is_approve();
        let action = if approved {
            ModAction::Approved
        } else {
            ModAction::Denied
        };
        if !self
            .ctx
            .ledger
            .resolve_post(record.id, action, reviewer, Utc::now())?
        {
            return Ok(Outcome::AlreadyResolved);
        }

        if let Some(chat) = record.chat {
            if let Err(e) =
                delete_if_present(self.ctx.chat.as_ref(), chat.channel_id, chat.message_id).await
            {
                tracing::warn!("failed to remove card for post {}: {e}", post.post_id);
            }
        }

        let line = format!(
            "PHPBB {} for {} {} by {}",
            post.mode,
            post.author_name,
            verb(approved),
            reviewer.name
        );
        tracing::info!("{line}");
        notify(self.ctx.chat.as_ref(), self.log_channel, &line).await;
        Ok(Outcome::Success)
    }
}
