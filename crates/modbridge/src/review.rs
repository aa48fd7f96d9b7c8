//! Manual review escalation: moves an automod-flagged account request out
//! of the automatic deny path and onto the human review channel.

use crate::chat::{cards, notify, ModerationView, OutgoingMessage};
use crate::error::BridgeResult;
use crate::ledger::Moderator;
use crate::reconcile::BridgeContext;
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    UnknownRequest,
    AlreadyResolved { by: String },
    NotFlagged,
    AlreadyEscalated { by: String },
    Escalated { message_id: u64 },
}

impl fmt::Display for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRequest => f.write_str("no ledger entry for that request"),
            Self::AlreadyResolved { by } => write!(f, "request was already handled by {by}"),
            Self::NotFlagged => f.write_str("request was not flagged by automod"),
            Self::AlreadyEscalated { by } => {
                write!(f, "request was already sent to manual review by {by}")
            }
            Self::Escalated { message_id } => {
                write!(f, "request sent to manual review as message {message_id}")
            }
        }
    }
}

/// Escalate request `acrid` on behalf of `reviewer`.
///
/// Runs under the moderation lock so it cannot interleave with the automod
/// sweep. The ledger update is conditional as well, so a sweep in another
/// process that resolves first makes this return `AlreadyResolved`.
pub async fn escalate(
    ctx: &BridgeContext,
    request_url: &str,
    acrid: u64,
    reviewer: &Moderator,
) -> BridgeResult<Escalation> {
    let _guard = ctx.lock.lock().await;

    let Some(record) = ctx.ledger.account_by_acrid(acrid)? else {
        return Ok(Escalation::UnknownRequest);
    };
    if let Some(resolution) = &record.resolution {
        return Ok(Escalation::AlreadyResolved {
            by: resolution.by.name.clone(),
        });
    }
    if !record.is_flagged() {
        return Ok(Escalation::NotFlagged);
    }
    if let Some(review) = &record.manual_review {
        return Ok(Escalation::AlreadyEscalated {
            by: review.by.name.clone(),
        });
    }

    if !ctx.ledger.set_manual_review(record.id, reviewer, Utc::now())? {
        // Lost a race with another process; report what it did.
        return Ok(match ctx.ledger.account(record.id)? {
            Some(current) => match (current.resolution, current.manual_review) {
                (Some(resolution), _) => Escalation::AlreadyResolved {
                    by: resolution.by.name,
                },
                (None, Some(review)) => Escalation::AlreadyEscalated { by: review.by.name },
                (None, None) => Escalation::UnknownRequest,
            },
            None => Escalation::UnknownRequest,
        });
    }

    let card = cards::account_card(&record.request, request_url);
    let posted = ctx
        .chat
        .send(
            ctx.channels.wiki_requests,
            OutgoingMessage::embed(card).with_view(ModerationView::AccountApproval),
        )
        .await?;
    ctx.ledger.set_account_chat_link(record.id, posted.into())?;

    let line = format!(
        "{acrid} has been flagged for manual review by {}",
        reviewer.name
    );
    tracing::info!("{line}");
    notify(ctx.chat.as_ref(), ctx.channels.wiki_logs, &line).await;

    Ok(Escalation::Escalated {
        message_id: posted.id,
    })
}
