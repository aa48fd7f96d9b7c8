//! Reconciliation scenarios over the in-memory chat surface and fake
//! upstream queues.

mod common;

use chrono::{Duration, Utc};
use common::*;
use modbridge::automod::{classify, SpamCategory};
use modbridge::chat::{ChatSurface, ModerationView};
use modbridge::dispatch::{ForumDispatcher, Outcome, WikiDispatcher};
use modbridge::error::{BridgeError, ChatError};
use modbridge::forum::{ForumDecision, QueueMode};
use modbridge::ledger::{ModAction, Moderator};
use modbridge::reconcile::{ForumSync, TickReport, WikiSync};
use std::collections::BTreeSet;
use std::sync::Arc;

fn wiki_sync(ctx: &modbridge::reconcile::BridgeContext, wiki: Arc<FakeWiki>) -> WikiSync {
    let dispatcher = Arc::new(WikiDispatcher::new(ctx.clone(), wiki.clone()));
    WikiSync::new(ctx.clone(), wiki, dispatcher)
}

#[tokio::test]
async fn test_clean_request_gets_a_card() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let sync = wiki_sync(&ctx, wiki);

    let report = sync.run_once().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.flagged, 0);

    let cards = chat.messages(WIKI_REQUESTS);
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].embeds.len(), 1);
    assert_eq!(cards[0].embeds[0].title, "Wiki Account Request (2)");
    assert_eq!(chat.view_for(cards[0].id), Some(ModerationView::AccountApproval));

    let record = ctx.ledger.account_by_acrid(2).unwrap().unwrap();
    assert!(record.spam_categories.is_empty());
    let link = record.chat.unwrap();
    assert_eq!(link.message_id, cards[0].id);
    assert_eq!(link.channel_id, WIKI_REQUESTS);
    assert_eq!(link.guild_id, Some(1));
}

#[tokio::test]
async fn test_flagged_request_only_gets_a_notice() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(3, "bio <br>")]);
    let sync = wiki_sync(&ctx, wiki);

    let report = sync.run_once().await.unwrap();
    assert_eq!(report.flagged, 1);
    assert_eq!(report.created, 0);

    assert!(chat.messages(WIKI_REQUESTS).is_empty());
    let notices = chat.messages(WIKI_LOGS);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].embeds[0].title, "Automod");
    assert!(notices[0].embeds[0].description.contains("HAS_HTML"));

    let record = ctx.ledger.account_by_acrid(3).unwrap().unwrap();
    assert_eq!(record.spam_categories, BTreeSet::from([SpamCategory::HasHtml]));
    assert!(record.chat.is_none());
}

#[tokio::test]
async fn test_second_tick_changes_nothing() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![
        request(2, "I restore old games."),
        request(3, "bio <br>"),
    ]);
    let sync = wiki_sync(&ctx, wiki);

    sync.run_once().await.unwrap();
    let cards = chat.messages(WIKI_REQUESTS);
    let logs = chat.messages(WIKI_LOGS);

    let report = sync.run_once().await.unwrap();
    assert!(report.is_quiet(), "unexpected changes: {report}");
    assert_eq!(chat.messages(WIKI_REQUESTS), cards);
    assert_eq!(chat.messages(WIKI_LOGS), logs);
}

#[tokio::test]
async fn test_orphan_messages_are_removed() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(Vec::new());
    let stray = chat.inject(WIKI_REQUESTS, 99, "thanks!");
    let sync = wiki_sync(&ctx, wiki);

    let report = sync.run_once().await.unwrap();
    assert_eq!(
        report,
        TickReport {
            orphans_deleted: 1,
            ..TickReport::default()
        }
    );
    assert!(chat.messages(WIKI_REQUESTS).iter().all(|m| m.id != stray));
}

#[tokio::test]
async fn test_requests_handled_on_the_wiki_are_purged() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let sync = wiki_sync(&ctx, wiki.clone());
    sync.run_once().await.unwrap();
    assert_eq!(chat.messages(WIKI_REQUESTS).len(), 1);

    wiki.set_pending(Vec::new());
    let report = sync.run_once().await.unwrap();
    assert_eq!(report.purged, 1);
    assert!(chat.messages(WIKI_REQUESTS).is_empty());
    assert!(ctx.ledger.account_by_acrid(2).unwrap().is_none());
}

#[tokio::test]
async fn test_resolved_requests_are_never_reposted() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let sync = wiki_sync(&ctx, wiki);
    sync.run_once().await.unwrap();

    // Resolved in the ledger while the wiki still lists it.
    let record = ctx.ledger.account_by_acrid(2).unwrap().unwrap();
    ctx.ledger
        .resolve_account(record.id, ModAction::Approved, &Moderator::new(5, "alice"), Utc::now())
        .unwrap();
    let card = record.chat.unwrap();
    chat.delete(card.channel_id, card.message_id).await.unwrap();

    let report = sync.run_once().await.unwrap();
    assert_eq!(report.created, 0);
    assert!(chat.messages(WIKI_REQUESTS).is_empty());
}

#[tokio::test]
async fn test_card_left_behind_by_a_decision_is_removed() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let dispatcher = Arc::new(WikiDispatcher::new(ctx.clone(), wiki.clone()));
    let sync = WikiSync::new(ctx.clone(), wiki.clone(), dispatcher.clone());
    sync.run_once().await.unwrap();
    let card = ctx.ledger.account_by_acrid(2).unwrap().unwrap().chat.unwrap();

    // The decision lands upstream but the card cannot be deleted.
    chat.set_unavailable(true);
    let outcome = dispatcher
        .resolve(card.message_id, true, &Moderator::new(5, "alice"))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Success);
    chat.set_unavailable(false);
    assert_eq!(chat.messages(WIKI_REQUESTS).len(), 1);

    let report = sync.run_once().await.unwrap();
    assert_eq!(
        report,
        TickReport {
            orphans_deleted: 1,
            ..TickReport::default()
        }
    );
    assert!(chat.messages(WIKI_REQUESTS).is_empty());
    assert_eq!(chat.view_for(card.message_id), None);

    let record = ctx.ledger.account_by_acrid(2).unwrap().unwrap();
    assert!(record.is_resolved());
    assert!(record.chat.is_none());
    assert!(sync.run_once().await.unwrap().is_quiet());
}

#[tokio::test]
async fn test_lost_card_is_posted_again() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let sync = wiki_sync(&ctx, wiki);
    sync.run_once().await.unwrap();

    let before = ctx.ledger.account_by_acrid(2).unwrap().unwrap();
    let old = before.chat.unwrap();
    chat.delete(old.channel_id, old.message_id).await.unwrap();

    let report = sync.run_once().await.unwrap();
    assert_eq!(report.created, 1);

    let cards = chat.messages(WIKI_REQUESTS);
    assert_eq!(cards.len(), 1);
    let after = ctx.ledger.account_by_acrid(2).unwrap().unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.chat.unwrap().message_id, cards[0].id);
    assert_ne!(cards[0].id, old.message_id);
}

#[tokio::test]
async fn test_stale_flagged_request_is_swept() {
    let (chat, ctx) = context();
    let bio = "buy now https://spam.example.com";
    let spam = request(3, bio);
    ctx.ledger
        .insert_account(&spam, None, &classify(bio), Utc::now() - Duration::days(3))
        .unwrap();
    let wiki = FakeWiki::with(vec![spam]);
    let sync = wiki_sync(&ctx, wiki.clone());

    let report = sync.run_once().await.unwrap();
    assert_eq!(report.swept, 1);
    assert_eq!(wiki.decisions(), vec![(3, false)]);

    let record = ctx.ledger.account_by_acrid(3).unwrap().unwrap();
    let resolution = record.resolution.unwrap();
    assert_eq!(resolution.action, ModAction::Denied);
    assert_eq!(resolution.by, Moderator::new(1, "modbridge"));
    assert_eq!(
        chat.texts(WIKI_LOGS),
        vec!["Wiki account for user3 denied by modbridge".to_string()]
    );
}

#[tokio::test]
async fn test_grace_period_counts_from_the_wiki_request() {
    let (_chat, ctx) = context();
    let mut spam = request(7, "<b>cheap pills</b>");
    spam.requested_at = Utc::now() - Duration::hours(49);
    let wiki = FakeWiki::with(vec![spam]);
    let sync = wiki_sync(&ctx, wiki.clone());

    // First seen today, but asked for two days ago.
    let report = sync.run_once().await.unwrap();
    assert_eq!(report.flagged, 1);
    assert_eq!(report.swept, 1);
    assert_eq!(wiki.decisions(), vec![(7, false)]);

    let record = ctx.ledger.account_by_acrid(7).unwrap().unwrap();
    assert_eq!(record.time_created, record.request.requested_at);
}

#[tokio::test]
async fn test_sweep_spares_recent_and_escalated_requests() {
    let (_chat, ctx) = context();
    let bio = "<b>hello</b>";
    let old = request(4, bio);
    let recent = request(5, bio);
    let old_id = ctx
        .ledger
        .insert_account(&old, None, &classify(bio), Utc::now() - Duration::days(3))
        .unwrap();
    ctx.ledger
        .insert_account(&recent, None, &classify(bio), Utc::now() - Duration::hours(47))
        .unwrap();
    assert!(ctx
        .ledger
        .set_manual_review(old_id, &Moderator::new(5, "alice"), Utc::now())
        .unwrap());

    let wiki = FakeWiki::with(vec![old, recent]);
    let sync = wiki_sync(&ctx, wiki.clone());
    let report = sync.run_once().await.unwrap();

    assert_eq!(report.swept, 0);
    assert!(wiki.decisions().is_empty());
    assert!(!ctx.ledger.account_by_acrid(4).unwrap().unwrap().is_resolved());
    assert!(!ctx.ledger.account_by_acrid(5).unwrap().unwrap().is_resolved());
}

#[tokio::test]
async fn test_sweep_runs_at_most_hourly() {
    let (_chat, ctx) = context();
    let wiki = FakeWiki::with(Vec::new());
    let sync = wiki_sync(&ctx, wiki.clone());
    sync.run_once().await.unwrap();

    let bio = "<i>late</i>";
    let late = request(6, bio);
    ctx.ledger
        .insert_account(&late, None, &classify(bio), Utc::now() - Duration::days(4))
        .unwrap();
    wiki.set_pending(vec![late]);

    let report = sync.run_once().await.unwrap();
    assert_eq!(report.swept, 0);
    assert!(wiki.decisions().is_empty());
}

#[tokio::test]
async fn test_unavailable_chat_fails_the_tick() {
    let (chat, ctx) = context();
    let wiki = FakeWiki::with(vec![request(2, "I restore old games.")]);
    let sync = wiki_sync(&ctx, wiki);
    chat.set_unavailable(true);

    let err = sync.run_once().await.unwrap_err();
    assert!(matches!(err, BridgeError::Chat(ChatError::Unavailable(_))));
    assert!(ctx.ledger.account_by_acrid(2).unwrap().is_none());
}

#[tokio::test]
async fn test_forum_queues_land_in_their_channels() {
    let (chat, ctx) = context();
    let forum = FakeForum::with(vec![
        post(100, QueueMode::Topics),
        post(200, QueueMode::Posts),
    ]);
    let channels = ctx.channels.forum.unwrap();
    let sync = ForumSync::new(ctx.clone(), forum.clone(), channels);

    let report = sync.run_once().await.unwrap();
    assert_eq!(report.created, 2);

    let topics = chat.messages(FORUM_TOPICS);
    let posts = chat.messages(FORUM_POSTS);
    assert_eq!(topics.len(), 1);
    assert_eq!(posts.len(), 1);
    assert_eq!(topics[0].embeds[0].title, "Forum Topic Approval (100)");
    assert_eq!(posts[0].embeds[0].title, "Forum Post Approval (200)");
    assert_eq!(chat.view_for(posts[0].id), Some(ModerationView::ForumModeration));
    assert_eq!(
        ctx.ledger.post_by_message(posts[0].id).unwrap().unwrap().post.post_id,
        200
    );

    assert!(sync.run_once().await.unwrap().is_quiet());

    forum.set_pending(vec![post(100, QueueMode::Topics)]);
    let report = sync.run_once().await.unwrap();
    assert_eq!(report.purged, 1);
    assert!(chat.messages(FORUM_POSTS).is_empty());
    assert_eq!(chat.messages(FORUM_TOPICS).len(), 1);
    assert!(ctx.ledger.post_by_post_id(200).unwrap().is_none());
}

#[tokio::test]
async fn test_forum_card_left_behind_by_a_decision_is_removed() {
    let (chat, ctx) = context();
    let forum = FakeForum::with(vec![post(200, QueueMode::Posts)]);
    let sync = ForumSync::new(ctx.clone(), forum.clone(), ctx.channels.forum.unwrap());
    sync.run_once().await.unwrap();
    let card = ctx.ledger.post_by_post_id(200).unwrap().unwrap().chat.unwrap();

    chat.set_unavailable(true);
    let dispatcher = ForumDispatcher::new(ctx.clone(), forum.clone(), FORUM_LOGS);
    let outcome = dispatcher
        .resolve(card.message_id, &ForumDecision::Approve, &Moderator::new(5, "alice"))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Success);
    chat.set_unavailable(false);

    let report = sync.run_once().await.unwrap();
    assert_eq!(report.orphans_deleted, 1);
    assert_eq!(report.created, 0);
    assert!(chat.messages(FORUM_POSTS).is_empty());
    assert_eq!(chat.view_for(card.message_id), None);

    let record = ctx.ledger.post_by_post_id(200).unwrap().unwrap();
    assert!(record.is_resolved());
    assert!(record.chat.is_none());
    assert!(sync.run_once().await.unwrap().is_quiet());
}

#[tokio::test]
async fn test_unreadable_post_keeps_its_card() {
    let (chat, ctx) = context();
    let forum = FakeForum::with(vec![post(200, QueueMode::Posts)]);
    let sync = ForumSync::new(ctx.clone(), forum.clone(), ctx.channels.forum.unwrap());
    sync.run_once().await.unwrap();
    let card = chat.messages(FORUM_POSTS)[0].id;

    // Still queued on the forum, but its detail page did not parse.
    forum.set_unreadable(200, true);
    let report = sync.run_once().await.unwrap();
    assert!(report.is_quiet(), "unexpected changes: {report}");
    assert_eq!(chat.messages(FORUM_POSTS)[0].id, card);
    assert!(ctx.ledger.post_by_post_id(200).unwrap().is_some());

    forum.set_unreadable(200, false);
    forum.set_pending(Vec::new());
    let report = sync.run_once().await.unwrap();
    assert_eq!(report.purged, 1);
    assert!(chat.messages(FORUM_POSTS).is_empty());
}
