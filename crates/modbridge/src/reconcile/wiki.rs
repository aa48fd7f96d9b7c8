//! Wiki account request sync and the automod sweep.

use super::{BridgeContext, TickReport};
use crate::automod;
use crate::chat::{cards, delete_if_present, notify, ModerationView, OutgoingMessage};
use crate::dispatch::{Outcome, WikiDispatcher};
use crate::error::BridgeResult;
use crate::ledger::Moderator;
use crate::pending::native_ids;
use crate::scheduler::ReconcileTask;
use crate::wiki::{WikiAccountRequest, WikiBackend};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Minimum spacing between two automod sweeps.
pub const SWEEP_EVERY: Duration = Duration::from_secs(60 * 60);
/// Age after which an unreviewed flagged request is denied.
pub const AUTOMOD_GRACE_HOURS: i64 = 48;

pub struct WikiSync {
    ctx: BridgeContext,
    wiki: Arc<dyn WikiBackend>,
    dispatcher: Arc<WikiDispatcher>,
    last_sweep: Mutex<Option<Instant>>,
}

impl WikiSync {
    pub fn new(
        ctx: BridgeContext,
        wiki: Arc<dyn WikiBackend>,
        dispatcher: Arc<WikiDispatcher>,
    ) -> Self {
        Self {
            ctx,
            wiki,
            dispatcher,
            last_sweep: Mutex::new(None),
        }
    }

    /// One full reconciliation pass.
    pub async fn run_once(&self) -> BridgeResult<TickReport> {
        let _guard = self.ctx.lock.lock().await;
        let mut report = TickReport::default();

        let mut known = self.sync_from_chat(&mut report).await?;

        let pending = self.wiki.pending_requests().await?;
        let pending_ids = native_ids(&pending);
        known.extend(self.ctx.ledger.flagged_acrids()?);
        known.extend(self.ctx.ledger.resolved_acrids()?);

        for request in pending.iter().filter(|r| !known.contains(&r.acrid)) {
            self.create(request, &mut report).await?;
        }

        self.purge(&pending_ids, &mut report).await?;

        if self.claim_sweep() {
            report.swept = self.sweep().await?;
        }

        Ok(report)
    }

    /// Drop cards with no open ledger row and re-attach controls to the rest.
    async fn sync_from_chat(&self, report: &mut TickReport) -> BridgeResult<HashSet<u64>> {
        let channel = self.ctx.channels.wiki_requests;
        let mut known = HashSet::new();

        for message in self.ctx.chat.history(channel).await? {
            match self.ctx.ledger.account_by_message(message.id)? {
                Some(record) if record.is_resolved() => {
                    tracing::info!(
                        "card {} for handled request {} is still posted, deleting",
                        message.id,
                        record.request.acrid
                    );
                    if delete_if_present(self.ctx.chat.as_ref(), channel, message.id).await? {
                        report.orphans_deleted += 1;
                    }
                    self.ctx.ledger.clear_account_chat_link(record.id)?;
                    known.insert(record.request.acrid);
                }
                Some(record) => {
                    self.ctx
                        .chat
                        .register_view(ModerationView::AccountApproval, message.id)
                        .await?;
                    known.insert(record.request.acrid);
                }
                None => {
                    tracing::info!(
                        "found message {} in channel {channel} not attached to a ledger entry, deleting",
                        message.id
                    );
                    if delete_if_present(self.ctx.chat.as_ref(), channel, message.id).await? {
                        report.orphans_deleted += 1;
                    }
                }
            }
        }

        Ok(known)
    }

    async fn post_card(&self, request: &WikiAccountRequest) -> BridgeResult<crate::ledger::ChatLink> {
        let card = cards::account_card(request, &self.wiki.request_url(request.acrid));
        let posted = self
            .ctx
            .chat
            .send(
                self.ctx.channels.wiki_requests,
                OutgoingMessage::embed(card).with_view(ModerationView::AccountApproval),
            )
            .await?;
        Ok(posted.into())
    }

    async fn create(&self, request: &WikiAccountRequest, report: &mut TickReport) -> BridgeResult<()> {
        let acrid = request.acrid;

        // A row without a live card: the message was removed by hand.
        if let Some(existing) = self.ctx.ledger.account_by_acrid(acrid)? {
            tracing::info!("card for request {acrid} is missing, posting it again");
            let link = self.post_card(request).await?;
            self.ctx.ledger.set_account_chat_link(existing.id, link)?;
            report.created += 1;
            return Ok(());
        }

        let categories = automod::classify(&request.biography);
        // The grace period runs from when the wiki received the request.
        let created = request.requested_at;

        if categories.is_empty() {
            tracing::debug!("creating card for request {acrid}");
            let link = self.post_card(request).await?;
            self.ctx
                .ledger
                .insert_account(request, Some(link), &categories, created)?;
            report.created += 1;
            return Ok(());
        }

        tracing::info!(
            "request {acrid} flagged by automod: {}",
            automod::join_categories(&categories)
        );
        let notice = cards::automod_notice(acrid, &self.wiki.request_url(acrid), &categories);
        self.ctx
            .chat
            .send(self.ctx.channels.wiki_logs, OutgoingMessage::embed(notice))
            .await?;
        self.ctx
            .ledger
            .insert_account(request, None, &categories, created)?;
        report.flagged += 1;
        Ok(())
    }

    /// Remove open records whose request was handled on the wiki itself.
    async fn purge(&self, pending: &HashSet<u64>, report: &mut TickReport) -> BridgeResult<()> {
        let handled = self.ctx.ledger.unresolved_accounts_absent_from(pending)?;
        if !handled.is_empty() {
            tracing::debug!("{} handled requests pending prune", handled.len());
        }

        for record in handled {
            tracing::debug!("removing handled request {}", record.request.acrid);
            if let Some(chat) = record.chat {
                delete_if_present(self.ctx.chat.as_ref(), chat.channel_id, chat.message_id).await?;
            }
            self.ctx.ledger.delete_account(record.id)?;
            report.purged += 1;
        }
        Ok(())
    }

    /// True when the sweep has not run within [`SWEEP_EVERY`]; records
    /// this call as the latest run.
    fn claim_sweep(&self) -> bool {
        let mut last = self
            .last_sweep
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.is_some_and(|at| at.elapsed() < SWEEP_EVERY) {
            return false;
        }
        *last = Some(Instant::now());
        true
    }

    /// Deny every flagged request nobody looked at within the grace period.
    /// The caller must hold the moderation lock.
    async fn sweep(&self) -> BridgeResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::hours(AUTOMOD_GRACE_HOURS);
        let due = self.ctx.ledger.automod_due(cutoff)?;
        if due.is_empty() {
            return Ok(0);
        }

        let bot = self.ctx.chat.bot_user().await?;
        let bot = Moderator::new(bot.id, bot.name);
        let mut swept = 0;

        for record in due {
            // An escalation may have landed since the query.
            let Some(current) = self.ctx.ledger.account(record.id)? else {
                continue;
            };
            if current.is_resolved() || current.manual_review.is_some() {
                continue;
            }

            let acrid = current.request.acrid;
            match self.dispatcher.resolve_record(&current, false, &bot).await {
                Ok(Outcome::Success) => {
                    tracing::info!("automod denied request {acrid}");
                    swept += 1;
                }
                Ok(outcome) => {
                    tracing::warn!("automod deny of request {acrid} ended with {outcome:?}");
                }
                Err(e) => {
                    tracing::warn!("automod deny of request {acrid} failed: {e}");
                    notify(
                        self.ctx.chat.as_ref(),
                        self.ctx.channels.debug,
                        &format!("Automod failed to deny request {acrid}: {e}"),
                    )
                    .await;
                }
            }
        }

        Ok(swept)
    }
}

#[async_trait]
impl ReconcileTask for WikiSync {
    fn name(&self) -> &str {
        "wiki"
    }

    async fn tick(&self) -> BridgeResult<TickReport> {
        self.run_once().await
    }
}
