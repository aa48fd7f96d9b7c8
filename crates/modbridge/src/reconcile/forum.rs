//! Forum moderation queue sync, one pass per queue.

use super::{BridgeContext, TickReport};
use crate::chat::{cards, delete_if_present, ModerationView, OutgoingMessage};
use crate::config::ForumChannels;
use crate::error::BridgeResult;
use crate::forum::{ForumBackend, ForumPost, QueueMode};
use crate::ledger::ChatLink;
use crate::scheduler::ReconcileTask;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

pub struct ForumSync {
    ctx: BridgeContext,
    forum: Arc<dyn ForumBackend>,
    channels: ForumChannels,
}

impl ForumSync {
    pub fn new(ctx: BridgeContext, forum: Arc<dyn ForumBackend>, channels: ForumChannels) -> Self {
        Self {
            ctx,
            forum,
            channels,
        }
    }

    fn channel_for(&self, mode: QueueMode) -> u64 {
        match mode {
            QueueMode::Topics => self.channels.topics,
            QueueMode::Posts => self.channels.posts,
        }
    }

    /// Reconcile both queues. New topics go first.
    pub async fn run_once(&self) -> BridgeResult<TickReport> {
        let _guard = self.ctx.lock.lock().await;
        let mut report = TickReport::default();
        for mode in [QueueMode::Topics, QueueMode::Posts] {
            report.merge(self.sync_queue(mode).await?);
        }
        Ok(report)
    }

    async fn sync_queue(&self, mode: QueueMode) -> BridgeResult<TickReport> {
        let channel = self.channel_for(mode);
        let mut report = TickReport::default();
        let mut known = HashSet::new();

        for message in self.ctx.chat.history(channel).await? {
            match self.ctx.ledger.post_by_message(message.id)? {
                Some(record) if record.is_resolved() => {
                    tracing::info!(
                        "card {} for handled {} {} is still posted, deleting",
                        message.id,
                        record.post.mode,
                        record.post.post_id
                    );
                    if delete_if_present(self.ctx.chat.as_ref(), channel, message.id).await? {
                        report.orphans_deleted += 1;
                    }
                    self.ctx.ledger.clear_post_chat_link(record.id)?;
                }
                // Both queues may share one channel.
                Some(record) => {
                    self.ctx
                        .chat
                        .register_view(ModerationView::ForumModeration, message.id)
                        .await?;
                    if record.post.mode == mode {
                        known.insert(record.post.post_id);
                    }
                }
                None => {
                    tracing::info!(
                        "found message {} in {mode} channel not attached to a ledger entry, deleting",
                        message.id
                    );
                    if delete_if_present(self.ctx.chat.as_ref(), channel, message.id).await? {
                        report.orphans_deleted += 1;
                    }
                }
            }
        }

        let queue = self.forum.pending_posts(mode).await?;
        // Unreadable posts are still queued upstream; their cards stay.
        let pending_ids = queue.pending_ids();
        known.extend(self.ctx.ledger.resolved_post_ids(mode)?);

        for post in queue.posts.iter().filter(|p| !known.contains(&p.post_id)) {
            let link = self.post_card(post, channel).await?;
            match self.ctx.ledger.post_by_post_id(post.post_id)? {
                Some(existing) => {
                    tracing::info!("card for {mode} {} was missing, posted again", post.post_id);
                    self.ctx.ledger.set_post_chat_link(existing.id, link)?;
                }
                None => {
                    tracing::debug!("created card for {mode} {}", post.post_id);
                    self.ctx.ledger.insert_post(post, link, Utc::now())?;
                }
            }
            report.created += 1;
        }

        let handled = self
            .ctx
            .ledger
            .unresolved_posts_absent_from(mode, &pending_ids)?;
        for record in handled {
            tracing::debug!("removing handled {mode} {}", record.post.post_id);
            if let Some(chat) = record.chat {
                delete_if_present(self.ctx.chat.as_ref(), chat.channel_id, chat.message_id).await?;
            }
            self.ctx.ledger.delete_post(record.id)?;
            report.purged += 1;
        }

        Ok(report)
    }

    async fn post_card(&self, post: &ForumPost, channel: u64) -> BridgeResult<ChatLink> {
        let card = cards::forum_card(post, &self.forum.approve_details_url(post.post_id));
        let posted = self
            .ctx
            .chat
            .send(
                channel,
                OutgoingMessage::embed(card).with_view(ModerationView::ForumModeration),
            )
            .await?;
        Ok(posted.into())
    }
}

#[async_trait]
impl ReconcileTask for ForumSync {
    fn name(&self) -> &str {
        "forum"
    }

    async fn tick(&self) -> BridgeResult<TickReport> {
        self.run_once().await
    }
}
