//! Run the bridge: sync loops, the interaction gateway, and shutdown.

use anyhow::{Context, Result};
use modbridge::auth::SessionStore;
use modbridge::chat::discord::gateway::Gateway;
use modbridge::chat::discord::DiscordRest;
use modbridge::chat::ChatSurface;
use modbridge::config::Config;
use modbridge::dispatch::{ForumDispatcher, WikiDispatcher};
use modbridge::forum::{ForumBackend, ForumClient};
use modbridge::geo::{IpInfoClient, IpLookup};
use modbridge::http::HttpClient;
use modbridge::interaction::InteractionRouter;
use modbridge::ledger::Ledger;
use modbridge::reconcile::{BridgeContext, ForumSync, WikiSync};
use modbridge::scheduler;
use modbridge::wiki::{WikiBackend, WikiClient};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

pub async fn run() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    let instance = uuid::Uuid::new_v4();
    info!(
        "starting modbridge v{} instance={instance}",
        env!("CARGO_PKG_VERSION")
    );

    let ledger = Arc::new(
        Ledger::open(&config.ledger_path())
            .with_context(|| format!("failed to open ledger {}", config.ledger_path().display()))?,
    );
    let http = HttpClient::new(config.http_timeout_ms);
    let store = Arc::new(SessionStore::new(config.sessions_dir()));
    let rest = Arc::new(DiscordRest::new(&config.discord_token));

    let bot = rest
        .bot_user()
        .await
        .context("failed to reach Discord with DISCORD_BOT_TOKEN")?;
    info!("posting as {} ({})", bot.name, bot.id);

    let chat: Arc<dyn ChatSurface> = rest.clone();
    let ctx = BridgeContext::new(chat, ledger, config.channels);
    let shutdown = Arc::new(Notify::new());
    let mut loops = Vec::new();

    let wiki: Arc<dyn WikiBackend> =
        Arc::new(WikiClient::new(&config.wiki, http.clone(), store.clone()));
    let wiki_dispatcher = Arc::new(WikiDispatcher::new(ctx.clone(), wiki.clone()));
    let wiki_sync = WikiSync::new(ctx.clone(), wiki, wiki_dispatcher.clone());
    loops.push(scheduler::spawn(
        Arc::new(wiki_sync),
        config.wiki_poll_every,
        shutdown.clone(),
    ));

    let forum_dispatcher = match (&config.forum, config.channels.forum) {
        (Some(credentials), Some(channels)) => {
            let geo: Arc<dyn IpLookup> = Arc::new(IpInfoClient::new(
                config.ip_cache_path(),
                config.ipinfo_token.clone(),
            ));
            let forum: Arc<dyn ForumBackend> =
                Arc::new(ForumClient::new(credentials, http.clone(), store.clone(), geo));
            loops.push(scheduler::spawn(
                Arc::new(ForumSync::new(ctx.clone(), forum.clone(), channels)),
                config.forum_poll_every,
                shutdown.clone(),
            ));
            Some(Arc::new(ForumDispatcher::new(ctx.clone(), forum, channels.logs)))
        }
        _ => {
            info!("PHPBB_BASE_URL not set, forum moderation disabled");
            None
        }
    };

    let router = Arc::new(InteractionRouter::new(
        config.channels,
        &config.moderator_role,
        wiki_dispatcher,
        forum_dispatcher,
    ));
    let gateway = Gateway::new(rest, router).spawn(shutdown.clone());

    eprintln!(
        "  modbridge v{} started (data in {})",
        env!("CARGO_PKG_VERSION"),
        config.data_dir.display()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("received shutdown signal");
    shutdown.notify_waiters();

    for handle in loops {
        if let Err(e) = handle.await {
            tracing::warn!("sync loop ended abnormally: {e}");
        }
    }
    gateway.abort();

    eprintln!("  modbridge stopped.");
    Ok(())
}
