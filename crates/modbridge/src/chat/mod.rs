//! Chat approval surface abstraction.
//!
//! Defines the [`ChatSurface`] trait that the sync engine and dispatcher
//! talk to, plus the message and card types they exchange. Implemented by
//! [`discord::DiscordRest`] for production and [`memory::MemoryChat`] for
//! tests and dry runs.

pub mod cards;
pub mod discord;
pub mod memory;

use crate::error::ChatError;
use crate::ledger::ChatLink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChatResult<T> = Result<T, ChatError>;

/// One field of an embed card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Rich card posted alongside (or instead of) plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub color: Option<u32>,
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Set of interactive controls attached to a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModerationView {
    /// Approve / Deny buttons on a wiki account card.
    AccountApproval,
    /// Reason dropdown plus Approve / Deny / Deny & Ban on a forum card.
    ForumModeration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub embed: Option<Embed>,
    pub view: Option<ModerationView>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embed: Some(embed),
            ..Default::default()
        }
    }

    pub fn with_view(mut self, view: ModerationView) -> Self {
        self.view = Some(view);
        self
    }
}

/// Where a sent message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostedMessage {
    pub id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
}

impl From<PostedMessage> for ChatLink {
    fn from(posted: PostedMessage) -> Self {
        ChatLink {
            message_id: posted.id,
            channel_id: posted.channel_id,
            guild_id: posted.guild_id,
        }
    }
}

/// A message read back from channel history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub content: String,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub id: u64,
    pub name: String,
}

#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Every message currently in a channel, newest first.
    async fn history(&self, channel_id: u64) -> ChatResult<Vec<ChatMessage>>;

    async fn send(&self, channel_id: u64, message: OutgoingMessage) -> ChatResult<PostedMessage>;

    /// Fails with [`ChatError::NotFound`] when the message is already gone.
    async fn delete(&self, channel_id: u64, message_id: u64) -> ChatResult<()>;

    /// Re-attach interaction handling for a card that survived a restart.
    async fn register_view(&self, view: ModerationView, message_id: u64) -> ChatResult<()>;

    /// The account the bridge posts as.
    async fn bot_user(&self) -> ChatResult<ChatUser>;
}

/// Delete a message, treating "already gone" as done. Returns whether a
/// message was actually removed.
pub async fn delete_if_present(
    chat: &dyn ChatSurface,
    channel_id: u64,
    message_id: u64,
) -> ChatResult<bool> {
    match chat.delete(channel_id, message_id).await {
        Ok(()) => Ok(true),
        Err(ChatError::NotFound(_)) => {
            tracing::warn!("tried to delete message {message_id} but it is already gone");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Post a plain line of text, logging instead of failing.
pub async fn notify(chat: &dyn ChatSurface, channel_id: u64, text: &str) {
    if let Err(e) = chat.send(channel_id, OutgoingMessage::text(text)).await {
        tracing::warn!("failed to post to channel {channel_id}: {e}");
    }
}
