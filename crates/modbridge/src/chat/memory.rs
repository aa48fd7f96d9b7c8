//! In-process chat surface for tests and dry runs.

use super::{
    ChatMessage, ChatResult, ChatSurface, ChatUser, ModerationView, OutgoingMessage, PostedMessage,
};
use crate::error::ChatError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

const FIRST_MESSAGE_ID: u64 = 1_000;

#[derive(Default)]
struct Inner {
    next_id: u64,
    /// Oldest first.
    channels: HashMap<u64, Vec<ChatMessage>>,
    views: HashMap<u64, ModerationView>,
}

/// Chat surface that keeps every channel in memory.
pub struct MemoryChat {
    bot: ChatUser,
    guild_id: Option<u64>,
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl Default for MemoryChat {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChat {
    pub fn new() -> Self {
        Self {
            bot: ChatUser {
                id: 1,
                name: "modbridge".to_string(),
            },
            guild_id: Some(1),
            inner: Mutex::new(Inner {
                next_id: FIRST_MESSAGE_ID,
                ..Default::default()
            }),
            unavailable: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call fail with [`ChatError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> ChatResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::Unavailable("memory chat switched off".to_string()));
        }
        Ok(())
    }

    /// Messages in a channel, oldest first.
    pub fn messages(&self, channel_id: u64) -> Vec<ChatMessage> {
        self.lock()
            .channels
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Plain-text content of every message in a channel, oldest first.
    pub fn texts(&self, channel_id: u64) -> Vec<String> {
        self.messages(channel_id)
            .into_iter()
            .filter(|m| !m.content.is_empty())
            .map(|m| m.content)
            .collect()
    }

    /// Message someone other than the bridge posted, such as a stray reply.
    pub fn inject(&self, channel_id: u64, author_id: u64, content: &str) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.channels.entry(channel_id).or_default().push(ChatMessage {
            id,
            channel_id,
            author_id,
            content: content.to_string(),
            embeds: Vec::new(),
        });
        id
    }

    pub fn view_for(&self, message_id: u64) -> Option<ModerationView> {
        self.lock().views.get(&message_id).copied()
    }
}

#[async_trait]
impl ChatSurface for MemoryChat {
    async fn history(&self, channel_id: u64) -> ChatResult<Vec<ChatMessage>> {
        self.check_available()?;
        let mut messages = self.messages(channel_id);
        messages.reverse();
        Ok(messages)
    }

    async fn send(&self, channel_id: u64, message: OutgoingMessage) -> ChatResult<PostedMessage> {
        self.check_available()?;
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        if let Some(view) = message.view {
            inner.views.insert(id, view);
        }
        inner.channels.entry(channel_id).or_default().push(ChatMessage {
            id,
            channel_id,
            author_id: self.bot.id,
            content: message.content.unwrap_or_default(),
            embeds: message.embed.into_iter().collect(),
        });
        Ok(PostedMessage {
            id,
            channel_id,
            guild_id: self.guild_id,
        })
    }

    async fn delete(&self, channel_id: u64, message_id: u64) -> ChatResult<()> {
        self.check_available()?;
        let mut inner = self.lock();
        inner.views.remove(&message_id);
        let messages = inner.channels.entry(channel_id).or_default();
        let before = messages.len();
        messages.retain(|m| m.id != message_id);
        if messages.len() == before {
            return Err(ChatError::NotFound(message_id));
        }
        Ok(())
    }

    async fn register_view(&self, view: ModerationView, message_id: u64) -> ChatResult<()> {
        self.check_available()?;
        self.lock().views.insert(message_id, view);
        Ok(())
    }

    async fn bot_user(&self) -> ChatResult<ChatUser> {
        self.check_available()?;
        Ok(self.bot.clone())
    }
}
