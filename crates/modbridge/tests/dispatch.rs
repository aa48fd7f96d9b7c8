//! Dispatcher and interaction routing scenarios.

mod common;

use common::*;
use modbridge::dispatch::{ForumDispatcher, Outcome, WikiDispatcher};
use modbridge::forum::{ForumDecision, QueueMode, RejectionReason};
use chrono::Utc;
use modbridge::automod::classify;
use modbridge::interaction::{
    CommandInvocation, Interaction, InteractionKind, InteractionRouter, Reviewer, SlashCommand,
    MISSING_CONFIRMATION_REPLY, MISSING_REASON_REPLY,
};
use modbridge::ledger::{ModAction, Moderator};
use modbridge::reconcile::{BridgeContext, ForumSync, WikiSync};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const ROLE: &str = "Wiki Moderator";

fn alice() -> Moderator {
    Moderator::new(5, "alice")
}

/// Post one wiki card and return its message id.
async fn wiki_card(
    ctx: &BridgeContext,
    wiki: &Arc<FakeWiki>,
    dispatcher: &Arc<WikiDispatcher>,
) -> u64 {
    WikiSync::new(ctx.clone(), wiki.clone(), dispatcher.clone())
        .run_once()
        .await
        .unwrap();
    ctx.ledger
        .account_by_acrid(2)
        .unwrap()
        .and_then(|r| r.chat)
        .map(|c| c.message_id)
        .unwrap()
}

async fn forum_card(ctx: &BridgeContext, forum: &Arc<FakeForum>) -> u64 {
    ForumSync::new(ctx.clone(), forum.clone(), ctx.channels.forum.unwrap())
        .run_once()
        .await
        .unwrap();
    ctx.ledger
        .post_by_post_id(200)
        .unwrap()
        .and_then(|r| r.chat)
        .map(|c| c.message_id)
        .unwrap()
}

#[tokio::test]
async fn test_unknown_message_is_not_found() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(Vec::new());
    let dispatcher = WikiDispatcher::new(ctx, wiki.clone());

    let outcome = dispatcher.resolve(4242, true, &alice()).await.unwrap();
    assert_eq!(outcome, Outcome::NotFound);
    assert!(wiki.decisions().is_empty());

    let debug = chat.texts(DEBUG);
    assert_eq!(debug.len(), 1);
    assert!(debug[0].contains("4242"));
    assert!(debug[0].contains("alice"));
}

#[tokio::test]
async fn test_approval_replays_and_cleans_up() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let dispatcher = Arc::new(WikiDispatcher::new(ctx.clone(), wiki.clone()));
    let card = wiki_card(&ctx, &wiki, &dispatcher).await;

    let outcome = dispatcher.resolve(card, true, &alice()).await.unwrap();
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(wiki.decisions(), vec![(2, true)]);
    assert!(chat.messages(WIKI_REQUESTS).is_empty());
    assert_eq!(
        chat.texts(WIKI_LOGS),
        vec!["Wiki account for user2 approved by alice".to_string()]
    );

    let resolution = ctx.ledger.account_by_acrid(2).unwrap().unwrap().resolution.unwrap();
    assert_eq!(resolution.action, ModAction::Approved);
    assert_eq!(resolution.by, alice());
}

#[tokio::test]
async fn test_concurrent_decisions_resolve_once() {
    let (_chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let dispatcher = Arc::new(WikiDispatcher::new(ctx.clone(), wiki.clone()));
    let card = wiki_card(&ctx, &wiki, &dispatcher).await;

    let alice = alice();
    let bob = Moderator::new(6, "bob");
    let (approve, deny) = tokio::join!(
        dispatcher.resolve(card, true, &alice),
        dispatcher.resolve(card, false, &bob),
    );
    let outcomes = [approve.unwrap(), deny.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 1);
    assert!(outcomes.contains(&Outcome::AlreadyResolved));
    assert_eq!(wiki.decisions().len(), 1);
}

#[tokio::test]
async fn test_upstream_failure_keeps_the_card_open() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let dispatcher = Arc::new(WikiDispatcher::new(ctx.clone(), wiki.clone()));
    let card = wiki_card(&ctx, &wiki, &dispatcher).await;
    wiki.fail(true);

    let outcome = dispatcher.resolve(card, false, &alice()).await.unwrap();
    assert!(matches!(outcome, Outcome::UpstreamError(_)));
    assert!(!ctx.ledger.account_by_acrid(2).unwrap().unwrap().is_resolved());
    assert_eq!(chat.messages(WIKI_REQUESTS).len(), 1);
    assert_eq!(
        chat.texts(DEBUG),
        vec!["Failed to process mediawiki account confirmation".to_string()]
    );

    wiki.fail(false);
    let retry = dispatcher.resolve(card, false, &alice()).await.unwrap();
    assert_eq!(retry, Outcome::Success);
}

#[tokio::test]
async fn test_deny_and_ban() {
    let (chat, ctx) = context();
    let forum = FakeForum::with(vec![post(200, QueueMode::Posts)]);
    let card = forum_card(&ctx, &forum).await;
    let dispatcher = ForumDispatcher::new(ctx.clone(), forum.clone(), FORUM_LOGS);

    let outcome = dispatcher
        .deny_and_ban(card, RejectionReason::Advertising, "Spam links", &alice())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Success);

    let decisions = forum.decisions();
    assert_eq!(decisions.len(), 1);
    assert!(matches!(
        decisions[0],
        (200, ForumDecision::Deny { reason: RejectionReason::Advertising, .. })
    ));
    assert_eq!(
        forum.bans(),
        vec![(77, "alice".to_string(), "Spam links".to_string())]
    );

    let record = ctx.ledger.post_by_post_id(200).unwrap().unwrap();
    assert_eq!(record.resolution.unwrap().action, ModAction::Banned);
    assert!(chat.messages(FORUM_POSTS).is_empty());
    assert_eq!(
        chat.texts(FORUM_LOGS),
        vec![
            "PHPBB post for poster200 denied by alice".to_string(),
            "PHPBB user poster200 has been banned by alice".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_failed_ban_keeps_the_denial() {
    let (chat, ctx) = context();
    let forum = FakeForum::with(vec![post(200, QueueMode::Posts)]);
    forum.ban_failing.store(true, Ordering::SeqCst);
    let card = forum_card(&ctx, &forum).await;
    let dispatcher = ForumDispatcher::new(ctx.clone(), forum.clone(), FORUM_LOGS);

    let outcome = dispatcher
        .deny_and_ban(card, RejectionReason::Other, "", &alice())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::UpstreamError(_)));

    let record = ctx.ledger.post_by_post_id(200).unwrap().unwrap();
    assert_eq!(record.resolution.unwrap().action, ModAction::Denied);
    assert!(forum.bans().is_empty());
    assert_eq!(
        chat.texts(DEBUG),
        vec!["Failed to apply forum ban for poster200".to_string()]
    );
}

// ── Interaction routing ───────────────────────────────────────

struct Harness {
    chat: Arc<modbridge::chat::memory::MemoryChat>,
    ctx: BridgeContext,
    wiki: Arc<FakeWiki>,
    forum: Arc<FakeForum>,
    router: InteractionRouter,
    wiki_card: u64,
    forum_card: u64,
}

async fn harness() -> Harness {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let forum = FakeForum::with(vec![post(200, QueueMode::Posts)]);
    let wiki_dispatcher = Arc::new(WikiDispatcher::new(ctx.clone(), wiki.clone()));
    let forum_dispatcher = Arc::new(ForumDispatcher::new(ctx.clone(), forum.clone(), FORUM_LOGS));

    let wiki_card = wiki_card(&ctx, &wiki, &wiki_dispatcher).await;
    let forum_card = forum_card(&ctx, &forum).await;
    let router = InteractionRouter::new(
        ctx.channels,
        ROLE,
        wiki_dispatcher,
        Some(forum_dispatcher),
    );

    Harness {
        chat,
        ctx,
        wiki,
        forum,
        router,
        wiki_card,
        forum_card,
    }
}

fn member(roles: &[&str]) -> Reviewer {
    Reviewer {
        id: 5,
        display_name: "alice".into(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

fn on(message_id: u64, channel_id: u64, roles: &[&str], kind: InteractionKind) -> Interaction {
    Interaction {
        message_id,
        channel_id,
        user: member(roles),
        kind,
    }
}

#[tokio::test]
async fn test_router_requires_moderator_role() {
    let h = harness().await;
    let reply = h
        .router
        .handle(on(h.wiki_card, WIKI_REQUESTS, &["Member"], InteractionKind::Approve))
        .await;
    assert_eq!(reply, format!("Missing required discord role: {ROLE}"));
    assert!(h.wiki.decisions().is_empty());
    assert_eq!(h.chat.messages(WIKI_REQUESTS).len(), 1);
}

#[tokio::test]
async fn test_router_approves_wiki_card_once() {
    let h = harness().await;
    let approve = || on(h.wiki_card, WIKI_REQUESTS, &[ROLE], InteractionKind::Approve);

    assert_eq!(h.router.handle(approve()).await, "Request approved.");
    assert_eq!(
        h.router.handle(approve()).await,
        "This request has already been handled."
    );
    assert_eq!(h.wiki.decisions(), vec![(2, true)]);
}

#[tokio::test]
async fn test_router_validates_forum_reasons() {
    let h = harness().await;

    let no_reason = InteractionKind::Deny {
        reason_code: None,
        reason_text: "off topic".into(),
    };
    let reply = h
        .router
        .handle(on(h.forum_card, FORUM_POSTS, &[ROLE], no_reason))
        .await;
    assert_eq!(reply, MISSING_REASON_REPLY);

    let unconfirmed = InteractionKind::DenyAndBan {
        reason_code: Some(2),
        confirm: "confirm".into(),
        public_reason: "spam".into(),
    };
    let reply = h
        .router
        .handle(on(h.forum_card, FORUM_POSTS, &[ROLE], unconfirmed))
        .await;
    assert_eq!(reply, MISSING_CONFIRMATION_REPLY);
    assert!(h.forum.decisions().is_empty());

    let deny = InteractionKind::Deny {
        reason_code: Some(3),
        reason_text: "Please post in the right forum.".into(),
    };
    let reply = h
        .router
        .handle(on(h.forum_card, FORUM_POSTS, &[ROLE], deny))
        .await;
    assert_eq!(reply, "Request denied.");
    assert_eq!(
        h.forum.decisions(),
        vec![(
            200,
            ForumDecision::Deny {
                reason: RejectionReason::OffTopic,
                message: "Please post in the right forum.".into(),
            }
        )]
    );
}

#[tokio::test]
async fn test_router_ignores_unmoderated_channels() {
    let h = harness().await;
    let reply = h
        .router
        .handle(on(h.forum_card, 999, &[ROLE], InteractionKind::Approve))
        .await;
    assert_eq!(reply, "This channel is not moderated by the bridge.");

    // The ledger record is untouched.
    let record = h.ctx.ledger.post_by_post_id(200).unwrap().unwrap();
    assert!(!record.is_resolved());
    assert_eq!(h.chat.messages(FORUM_POSTS).len(), 1);
}

// ── Slash commands ────────────────────────────────────────────

fn command(roles: &[&str], command: SlashCommand) -> CommandInvocation {
    CommandInvocation {
        channel_id: WIKI_LOGS,
        user: member(roles),
        command,
    }
}

fn flag(ctx: &BridgeContext, acrid: u64, bio: &str) -> i64 {
    ctx.ledger
        .insert_account(&request(acrid, bio), None, &classify(bio), Utc::now())
        .unwrap()
}

#[tokio::test]
async fn test_review_command_escalates_and_card_is_actionable() {
    let h = harness().await;
    flag(&h.ctx, 3, "<b>hi</b>");

    let review = || command(&[ROLE], SlashCommand::ReviewWikiAccount { acrid: 3 });
    let reply = h.router.handle_command(review()).await;
    assert_eq!(reply, format!("3 has been sent to <#{WIKI_REQUESTS}>"));
    assert_eq!(
        h.chat.texts(WIKI_LOGS),
        vec!["3 has been flagged for manual review by alice".to_string()]
    );

    let url = modbridge::wiki::request_url("https://wiki.example.net", 3);
    assert_eq!(
        h.router.handle_command(review()).await,
        format!("[account request 3]({url}) was already marked by alice")
    );

    let card = h.ctx.ledger.account_by_acrid(3).unwrap().unwrap().chat.unwrap();
    let reply = h
        .router
        .handle(on(card.message_id, WIKI_REQUESTS, &[ROLE], InteractionKind::Approve))
        .await;
    assert_eq!(reply, "Request approved.");
    assert_eq!(h.wiki.decisions(), vec![(3, true)]);
}

#[tokio::test]
async fn test_review_command_requires_moderator_role() {
    let h = harness().await;
    flag(&h.ctx, 3, "<b>hi</b>");

    let reply = h
        .router
        .handle_command(command(&["Member"], SlashCommand::ReviewWikiAccount { acrid: 3 }))
        .await;
    assert_eq!(reply, format!("Missing required discord role: {ROLE}"));
    let record = h.ctx.ledger.account_by_acrid(3).unwrap().unwrap();
    assert!(record.manual_review.is_none());
    assert!(record.chat.is_none());
}

#[tokio::test]
async fn test_review_command_refuses_unknown_and_clean_requests() {
    let h = harness().await;
    let reply = h
        .router
        .handle_command(command(&[ROLE], SlashCommand::ReviewWikiAccount { acrid: 404 }))
        .await;
    assert_eq!(reply, "Unknown account request id");

    let reply = h
        .router
        .handle_command(command(&[ROLE], SlashCommand::ReviewWikiAccount { acrid: 2 }))
        .await;
    assert!(reply.ends_with("is not marked by automod"), "{reply}");
}

#[tokio::test]
async fn test_stats_command_renders_table() {
    let h = harness().await;
    let id = flag(&h.ctx, 3, "visit https://spam.example.com");
    h.ctx
        .ledger
        .resolve_account(id, ModAction::Denied, &alice(), Utc::now())
        .unwrap();

    let reply = h
        .router
        .handle_command(command(
            &[ROLE],
            SlashCommand::StatsAutomod {
                action: ModAction::Denied,
            },
        ))
        .await;
    assert!(reply.starts_with("```\n"), "{reply}");
    assert!(reply.ends_with("\n```"), "{reply}");
    assert!(reply.contains("AutoMod Stats"));
    assert!(reply.contains("100.00"));

    let denied = h
        .router
        .handle_command(command(
            &["Member"],
            SlashCommand::StatsAutomod {
                action: ModAction::Denied,
            },
        ))
        .await;
    assert_eq!(denied, format!("Missing required discord role: {ROLE}"));
}
