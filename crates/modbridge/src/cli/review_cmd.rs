//! Send an automod-flagged wiki request to the manual review channel.

use anyhow::{Context, Result};
use modbridge::chat::discord::DiscordRest;
use modbridge::chat::ChatSurface;
use modbridge::config::Config;
use modbridge::ledger::{Ledger, Moderator};
use modbridge::reconcile::BridgeContext;
use modbridge::review::{self, Escalation};
use modbridge::wiki;
use std::sync::Arc;

pub async fn run(acrid: u64, by: Option<&str>, json: bool) -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    let ledger = Arc::new(Ledger::open(&config.ledger_path()).context("failed to open ledger")?);
    let rest = Arc::new(DiscordRest::new(&config.discord_token));

    let reviewer = match by {
        Some(name) => Moderator::new(0, name),
        None => {
            let bot = rest.bot_user().await.context("failed to reach Discord")?;
            Moderator::new(bot.id, bot.name)
        }
    };

    let ctx = BridgeContext::new(rest, ledger, config.channels);
    let url = wiki::request_url(&config.wiki.base_url, acrid);
    let outcome = review::escalate(&ctx, &url, acrid, &reviewer).await?;

    if json {
        super::print_json(&serde_json::json!({
            "acrid": acrid,
            "escalated": matches!(outcome, Escalation::Escalated { .. }),
            "message": outcome.to_string(),
        }));
    } else {
        println!("  Request {acrid}: {outcome}");
    }

    match outcome {
        Escalation::Escalated { .. } => Ok(()),
        other => anyhow::bail!("request {acrid} was not escalated: {other}"),
    }
}
