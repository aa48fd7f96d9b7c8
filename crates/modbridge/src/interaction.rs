//! Routing of chat interactions (button presses, reason picks, modal
//! submissions, slash commands) to the dispatchers.
//!
//! The router owns the checks that do not need the ledger: the moderator
//! role gate, the forum rejection reason, and the ban confirmation.
//! Every call yields the ephemeral reply shown to the reviewer.

use crate::config::Channels;
use crate::dispatch::{ForumDispatcher, Outcome, WikiDispatcher};
use crate::error::BridgeResult;
use crate::forum::{ForumDecision, RejectionReason};
use crate::ledger::{ModAction, Moderator};
use crate::review::{self, Escalation};
use crate::stats::AutomodStats;
use std::sync::Arc;

pub const REVIEW_WIKI_ACCOUNT: &str = "review-wiki-account";
pub const STATS_AUTOMOD: &str = "stats-automod";

pub const BAN_CONFIRMATION: &str = "CONFIRM";
pub const MISSING_REASON_REPLY: &str = "You must specify a rejection category.";
pub const MISSING_CONFIRMATION_REPLY: &str = "You must specify CONFIRM in the previous form.";
const NOT_FOUND_REPLY: &str =
    "An error occurred while looking up the request: request with message id not found";

/// The member who pressed the control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reviewer {
    pub id: u64,
    pub display_name: String,
    /// Role names, not ids.
    pub roles: Vec<String>,
}

impl Reviewer {
    pub fn moderator(&self) -> Moderator {
        Moderator::new(self.id, self.display_name.clone())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionKind {
    Approve,
    Deny {
        /// Forum rejection reason code; ignored for wiki cards.
        reason_code: Option<u8>,
        reason_text: String,
    },
    DenyAndBan {
        reason_code: Option<u8>,
        confirm: String,
        public_reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub message_id: u64,
    pub channel_id: u64,
    pub user: Reviewer,
    pub kind: InteractionKind,
}

/// A slash command, already checked for well-formed options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlashCommand {
    /// Send an automod-flagged account request to the review channel.
    ReviewWikiAccount { acrid: u64 },
    /// Automod statistics over requests resolved with `action`.
    StatsAutomod { action: ModAction },
}

impl SlashCommand {
    /// Build a command from its name and `(option, value)` pairs.
    pub fn from_options(name: &str, options: &[(String, String)]) -> Option<Self> {
        let option = |key: &str| {
            options
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        match name {
            REVIEW_WIKI_ACCOUNT => {
                let acrid = option("acrid")?.trim().parse().ok()?;
                Some(Self::ReviewWikiAccount { acrid })
            }
            STATS_AUTOMOD => {
                let action = match option("action") {
                    None | Some("denied") => ModAction::Denied,
                    Some("approved") => ModAction::Approved,
                    Some(_) => return None,
                };
                Some(Self::StatsAutomod { action })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub channel_id: u64,
    pub user: Reviewer,
    pub command: SlashCommand,
}

/// Reply for a forum deny that has no usable reason, if any.
pub fn reason_problem(reason_code: Option<u8>) -> Option<&'static str> {
    match reason_code.and_then(RejectionReason::from_code) {
        Some(_) => None,
        None => Some(MISSING_REASON_REPLY),
    }
}

pub struct InteractionRouter {
    channels: Channels,
    moderator_role: String,
    wiki: Arc<WikiDispatcher>,
    forum: Option<Arc<ForumDispatcher>>,
}

impl InteractionRouter {
    pub fn new(
        channels: Channels,
        moderator_role: &str,
        wiki: Arc<WikiDispatcher>,
        forum: Option<Arc<ForumDispatcher>>,
    ) -> Self {
        Self {
            channels,
            moderator_role: moderator_role.to_string(),
            wiki,
            forum,
        }
    }

    /// Handle one interaction and return the reviewer-facing reply.
    pub async fn handle(&self, interaction: Interaction) -> String {
        match self.route(&interaction).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    "interaction on message {} by {} failed: {e}",
                    interaction.message_id,
                    interaction.user.display_name
                );
                format!("Something went wrong: {e}")
            }
        }
    }

    /// Run a slash command and return the reply.
    pub async fn handle_command(&self, invocation: CommandInvocation) -> String {
        match self.run_command(&invocation).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    "command {:?} by {} failed: {e}",
                    invocation.command,
                    invocation.user.display_name
                );
                format!("Something went wrong: {e}")
            }
        }
    }

    fn missing_role(&self, user: &Reviewer) -> Option<String> {
        if user.has_role(&self.moderator_role) {
            return None;
        }
        Some(format!(
            "Missing required discord role: {}",
            self.moderator_role
        ))
    }

    async fn run_command(&self, invocation: &CommandInvocation) -> BridgeResult<String> {
        if let Some(reply) = self.missing_role(&invocation.user) {
            return Ok(reply);
        }
        let ctx = self.wiki.context();

        match invocation.command {
            SlashCommand::ReviewWikiAccount { acrid } => {
                let url = self.wiki.request_url(acrid);
                let reviewer = invocation.user.moderator();
                let outcome = review::escalate(ctx, &url, acrid, &reviewer).await?;
                Ok(escalation_reply(acrid, &url, &outcome, ctx.channels.wiki_requests))
            }
            SlashCommand::StatsAutomod { action } => {
                let stats = AutomodStats::collect(&ctx.ledger, action)?;
                Ok(format!("```\n{}\n```", stats.render()))
            }
        }
    }

    async fn route(&self, interaction: &Interaction) -> BridgeResult<String> {
        if let Some(reply) = self.missing_role(&interaction.user) {
            return Ok(reply);
        }

        let reviewer = interaction.user.moderator();
        let message_id = interaction.message_id;

        if interaction.channel_id == self.channels.wiki_requests {
            let approved = match &interaction.kind {
                InteractionKind::Approve => true,
                InteractionKind::Deny { .. } => false,
                InteractionKind::DenyAndBan { .. } => {
                    return Ok("Banning is only available for forum posts.".to_string());
                }
            };
            let outcome = self.wiki.resolve(message_id, approved, &reviewer).await?;
            return Ok(reply_for(outcome, approved, "mediawiki"));
        }

        let is_forum_channel = self
            .channels
            .forum
            .map(|f| interaction.channel_id == f.topics || interaction.channel_id == f.posts)
            .unwrap_or(false);
        let Some(forum) = self.forum.as_ref().filter(|_| is_forum_channel) else {
            return Ok("This channel is not moderated by the bridge.".to_string());
        };

        match &interaction.kind {
            InteractionKind::Approve => {
                let outcome = forum
                    .resolve(message_id, &ForumDecision::Approve, &reviewer)
                    .await?;
                Ok(reply_for(outcome, true, "forum"))
            }
            InteractionKind::Deny {
                reason_code,
                reason_text,
            } => {
                let Some(reason) = reason_code.and_then(RejectionReason::from_code) else {
                    return Ok(MISSING_REASON_REPLY.to_string());
                };
                let decision = ForumDecision::Deny {
                    reason,
                    message: reason_text.clone(),
                };
                let outcome = forum.resolve(message_id, &decision, &reviewer).await?;
                Ok(reply_for(outcome, false, "forum"))
            }
            InteractionKind::DenyAndBan {
                reason_code,
                confirm,
                public_reason,
            } => {
                let Some(reason) = reason_code.and_then(RejectionReason::from_code) else {
                    return Ok(MISSING_REASON_REPLY.to_string());
                };
                if confirm.trim() != BAN_CONFIRMATION {
                    return Ok(MISSING_CONFIRMATION_REPLY.to_string());
                }
                let outcome = forum
                    .deny_and_ban(message_id, reason, public_reason, &reviewer)
                    .await?;
                Ok(match outcome {
                    Outcome::Success => "Post denied and author banned.".to_string(),
                    other => reply_for(other, false, "forum"),
                })
            }
        }
    }
}

fn escalation_reply(acrid: u64, url: &str, outcome: &Escalation, review_channel: u64) -> String {
    match outcome {
        Escalation::Escalated { .. } => format!("{acrid} has been sent to <#{review_channel}>"),
        Escalation::UnknownRequest => "Unknown account request id".to_string(),
        Escalation::AlreadyResolved { by } => {
            format!("[account request {acrid}]({url}) was already resolved by {by}")
        }
        Escalation::NotFlagged => {
            format!("[account request {acrid}]({url}) is not marked by automod")
        }
        Escalation::AlreadyEscalated { by } => {
            format!("[account request {acrid}]({url}) was already marked by {by}")
        }
    }
}

fn reply_for(outcome: Outcome, approved: bool, platform: &str) -> String {
    match outcome {
        Outcome::Success if approved => "Request approved.".to_string(),
        Outcome::Success => "Request denied.".to_string(),
        Outcome::NotFound => NOT_FOUND_REPLY.to_string(),
        Outcome::AlreadyResolved => "This request has already been handled.".to_string(),
        Outcome::UpstreamError(_) => format!(
            "An error occurred while looking up the request: unexpected {platform} response"
        ),
    }
}
