//! In-process wiki and forum backends plus a ready-made bridge context.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use modbridge::chat::memory::MemoryChat;
use modbridge::config::{Channels, ForumChannels};
use modbridge::error::{BridgeError, BridgeResult};
use modbridge::forum::{
    AuthorStats, ForumBackend, ForumDecision, ForumPost, ForumQueue, QueueMode,
};
use modbridge::geo::IpDetails;
use modbridge::ledger::Ledger;
use modbridge::reconcile::BridgeContext;
use modbridge::wiki::{WikiAccountRequest, WikiBackend};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const DEBUG: u64 = 10;
pub const WIKI_REQUESTS: u64 = 20;
pub const WIKI_LOGS: u64 = 30;
pub const FORUM_TOPICS: u64 = 40;
pub const FORUM_POSTS: u64 = 50;
pub const FORUM_LOGS: u64 = 60;

pub fn channels() -> Channels {
    Channels {
        debug: DEBUG,
        wiki_requests: WIKI_REQUESTS,
        wiki_logs: WIKI_LOGS,
        forum: Some(ForumChannels {
            topics: FORUM_TOPICS,
            posts: FORUM_POSTS,
            logs: FORUM_LOGS,
        }),
    }
}

pub fn context() -> (Arc<MemoryChat>, BridgeContext) {
    let chat = Arc::new(MemoryChat::new());
    let ledger = Arc::new(Ledger::open_in_memory().unwrap());
    (chat.clone(), BridgeContext::new(chat, ledger, channels()))
}

pub fn request(acrid: u64, biography: &str) -> WikiAccountRequest {
    WikiAccountRequest {
        acrid,
        source_ref: format!("/index.php?title=Special:ConfirmAccounts/authors&acrid={acrid}"),
        requested_at: Utc::now() - Duration::hours(1),
        username: format!("user{acrid}"),
        name: "Pat Example".into(),
        email: format!("user{acrid}@example.net"),
        biography: biography.into(),
    }
}

pub fn post(post_id: u64, mode: QueueMode) -> ForumPost {
    ForumPost {
        post_id,
        mode,
        topic_name: "Driver crash on start".into(),
        topic_url: format!("https://forum.example.net/viewtopic.php?p={post_id}"),
        forum_name: "Support".into(),
        forum_url: "https://forum.example.net/viewforum.php?f=2".into(),
        author_name: format!("poster{post_id}"),
        author_url: "https://forum.example.net/memberlist.php?mode=viewprofile&u=77".into(),
        author_id: 77,
        post_time: Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap(),
        ip: IpDetails {
            address: "198.51.100.4".into(),
            hostname: None,
            location: "Lyon FR".into(),
            organization: "AS64501 Example".into(),
        },
        post_text: "It crashes right after the splash screen.".into(),
        author: AuthorStats {
            join_date: None,
            warning_count: 0,
            post_count: 1,
            groups: "Registered users".into(),
        },
        last_approved_post_date: None,
    }
}

/// Wiki stand-in: a mutable queue and a log of replayed decisions.
#[derive(Default)]
pub struct FakeWiki {
    pub pending: Mutex<Vec<WikiAccountRequest>>,
    pub decisions: Mutex<Vec<(u64, bool)>>,
    pub failing: AtomicBool,
}

impl FakeWiki {
    pub fn with(pending: Vec<WikiAccountRequest>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(pending),
            ..Self::default()
        })
    }

    pub fn set_pending(&self, pending: Vec<WikiAccountRequest>) {
        *self.pending.lock().unwrap() = pending;
    }

    pub fn decisions(&self) -> Vec<(u64, bool)> {
        self.decisions.lock().unwrap().clone()
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl WikiBackend for FakeWiki {
    async fn pending_requests(&self) -> BridgeResult<Vec<WikiAccountRequest>> {
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn moderate(&self, request: &WikiAccountRequest, approved: bool) -> BridgeResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Upstream("wiki returned HTTP 500".into()));
        }
        // Yield so concurrent dispatches get a chance to interleave.
        tokio::task::yield_now().await;
        self.decisions.lock().unwrap().push((request.acrid, approved));
        self.pending
            .lock()
            .unwrap()
            .retain(|r| r.acrid != request.acrid);
        Ok(())
    }

    fn request_url(&self, acrid: u64) -> String {
        modbridge::wiki::request_url("https://wiki.example.net", acrid)
    }
}

/// Forum stand-in with both queues, replayed decisions and bans.
#[derive(Default)]
pub struct FakeForum {
    pub pending: Mutex<Vec<ForumPost>>,
    pub decisions: Mutex<Vec<(u64, ForumDecision)>>,
    pub bans: Mutex<Vec<(u64, String, String)>>,
    pub ban_failing: AtomicBool,
    /// Queued posts whose detail pages fail to parse.
    pub unreadable: Mutex<HashSet<u64>>,
}

impl FakeForum {
    pub fn with(pending: Vec<ForumPost>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(pending),
            ..Self::default()
        })
    }

    pub fn set_pending(&self, pending: Vec<ForumPost>) {
        *self.pending.lock().unwrap() = pending;
    }

    pub fn decisions(&self) -> Vec<(u64, ForumDecision)> {
        self.decisions.lock().unwrap().clone()
    }

    pub fn bans(&self) -> Vec<(u64, String, String)> {
        self.bans.lock().unwrap().clone()
    }

    pub fn set_unreadable(&self, post_id: u64, unreadable: bool) {
        let mut ids = self.unreadable.lock().unwrap();
        if unreadable {
            ids.insert(post_id);
        } else {
            ids.remove(&post_id);
        }
    }
}

#[async_trait]
impl ForumBackend for FakeForum {
    async fn pending_posts(&self, mode: QueueMode) -> BridgeResult<ForumQueue> {
        let unreadable = self.unreadable.lock().unwrap();
        let mut queue = ForumQueue::default();
        for post in self.pending.lock().unwrap().iter().filter(|p| p.mode == mode) {
            if unreadable.contains(&post.post_id) {
                queue.skipped.push(post.post_id);
            } else {
                queue.posts.push(post.clone());
            }
        }
        Ok(queue)
    }

    async fn moderate(&self, post_id: u64, decision: &ForumDecision) -> BridgeResult<()> {
        self.decisions.lock().unwrap().push((post_id, decision.clone()));
        self.pending.lock().unwrap().retain(|p| p.post_id != post_id);
        Ok(())
    }

    async fn ban_user(
        &self,
        user_id: u64,
        reviewer_name: &str,
        public_reason: &str,
    ) -> BridgeResult<()> {
        if self.ban_failing.load(Ordering::SeqCst) {
            return Err(BridgeError::AdminAuth("Unable to get error message".into()));
        }
        self.bans.lock().unwrap().push((
            user_id,
            reviewer_name.to_string(),
            public_reason.to_string(),
        ));
        Ok(())
    }

    fn approve_details_url(&self, post_id: u64) -> String {
        modbridge::forum::approve_details_url("https://forum.example.net", post_id)
    }
}
