//! phpBB (subsilver2 layout) integration: login, moderation queue
//! extraction, approve/disapprove replay, and banning through the ACP.

pub mod admin;
pub mod extract;
pub mod login;
pub mod moderate;

use crate::auth::{Authenticator, SessionStore};
use crate::config::Credentials;
use crate::error::{BridgeError, BridgeResult};
use crate::geo::{IpDetails, IpLookup};
use crate::http::{HttpClient, Session};
use crate::pending::{native_ids, PendingItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub use login::ForumLogin;

/// Which moderation queue an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueMode {
    /// First posts of new topics.
    Topics,
    /// Replies in existing topics.
    Posts,
}

impl QueueMode {
    pub const ALL: [QueueMode; 2] = [Self::Topics, Self::Posts];

    pub fn as_param(self) -> &'static str {
        match self {
            Self::Topics => "unapproved_topics",
            Self::Posts => "unapproved_posts",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Topics => "topic",
            Self::Posts => "post",
        }
    }

    pub fn is_for_new_topic(self) -> bool {
        self == Self::Topics
    }

    pub fn from_new_topic_flag(is_for_new_topic: bool) -> Self {
        if is_for_new_topic {
            Self::Topics
        } else {
            Self::Posts
        }
    }
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Author profile figures shown on the review card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorStats {
    pub join_date: Option<DateTime<Utc>>,
    pub warning_count: u32,
    pub post_count: u32,
    /// Comma-separated group names.
    pub groups: String,
}

/// A post or topic waiting in the moderation queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumPost {
    pub post_id: u64,
    pub mode: QueueMode,
    pub topic_name: String,
    pub topic_url: String,
    pub forum_name: String,
    pub forum_url: String,
    pub author_name: String,
    pub author_url: String,
    pub author_id: u64,
    pub post_time: DateTime<Utc>,
    pub ip: IpDetails,
    /// Post body markup, quotes folded.
    pub post_text: String,
    pub author: AuthorStats,
    /// Only looked up for replies.
    pub last_approved_post_date: Option<DateTime<Utc>>,
}

impl PendingItem for ForumPost {
    fn native_id(&self) -> u64 {
        self.post_id
    }

    fn source_ref(&self) -> &str {
        &self.topic_url
    }
}

/// Board-configured disapproval reasons, as worded in the reason picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    IllegalSoftware = 1,
    Advertising = 2,
    OffTopic = 3,
    Other = 4,
    Duplicate = 5,
    BelowStandards = 6,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 6] = [
        Self::IllegalSoftware,
        Self::Advertising,
        Self::OffTopic,
        Self::Other,
        Self::Duplicate,
        Self::BelowStandards,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::IllegalSoftware => "The message contains links to illegal or pirated software.",
            Self::Advertising => "Advertising for a website or another product.",
            Self::OffTopic => "The reported message is off topic.",
            Self::Other => "Does not fit into any other category.",
            Self::Duplicate => "The post in question is a duplicate.",
            Self::BelowStandards => "Does not meet posting standards.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForumDecision {
    Approve,
    Deny {
        reason: RejectionReason,
        message: String,
    },
}

impl ForumDecision {
    pub fn is_approve(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

/// One queue as read from the forum.
#[derive(Debug, Clone, Default)]
pub struct ForumQueue {
    pub posts: Vec<ForumPost>,
    /// Queued post ids whose detail pages could not be read this time.
    pub skipped: Vec<u64>,
}

impl ForumQueue {
    /// Every post id still waiting in the queue, readable or not.
    pub fn pending_ids(&self) -> HashSet<u64> {
        let mut ids = native_ids(&self.posts);
        ids.extend(self.skipped.iter().copied());
        ids
    }
}

/// What the sync engine needs from the forum.
#[async_trait]
pub trait ForumBackend: Send + Sync {
    async fn pending_posts(&self, mode: QueueMode) -> BridgeResult<ForumQueue>;

    async fn moderate(&self, post_id: u64, decision: &ForumDecision) -> BridgeResult<()>;

    /// Ban the author's username through the administration panel.
    async fn ban_user(&self, user_id: u64, reviewer_name: &str, public_reason: &str)
        -> BridgeResult<()>;

    /// Absolute URL of the moderator view of a queued post.
    fn approve_details_url(&self, post_id: u64) -> String;
}

pub struct ForumClient {
    auth: Authenticator<ForumLogin>,
    geo: Arc<dyn IpLookup>,
    base_url: String,
}

impl ForumClient {
    pub fn new(
        credentials: &Credentials,
        http: HttpClient,
        store: Arc<SessionStore>,
        geo: Arc<dyn IpLookup>,
    ) -> Self {
        let flow = ForumLogin::new(&credentials.username, &credentials.password);
        Self {
            auth: Authenticator::new(flow, store, http, &credentials.base_url),
            geo,
            base_url: credentials.base_url.clone(),
        }
    }

    pub fn authenticator(&self) -> &Authenticator<ForumLogin> {
        &self.auth
    }

    /// A session that has passed the administration re-authentication.
    /// Runs the base login again at most once.
    pub async fn admin_session(&self, force_fresh: bool) -> BridgeResult<Session> {
        let mut retried = force_fresh;
        loop {
            let session = self.auth.session(retried).await?;
            match admin::enter_admin(&session, self.auth.flow().password()).await? {
                admin::AdminEntry::Entered => return Ok(session),
                admin::AdminEntry::NeedsBaseLogin(reason) if !retried => {
                    tracing::warn!("forum admin entry failed ({reason}), logging in again");
                    retried = true;
                }
                admin::AdminEntry::NeedsBaseLogin(reason) => {
                    return Err(BridgeError::AdminAuth(reason));
                }
            }
        }
    }
}

#[async_trait]
impl ForumBackend for ForumClient {
    async fn pending_posts(&self, mode: QueueMode) -> BridgeResult<ForumQueue> {
        let mut force_fresh = false;
        loop {
            let session = self.auth.session(force_fresh).await?;
            match extract::fetch_queue(&session, mode, self.geo.as_ref()).await {
                Err(BridgeError::SessionInvalid(_)) if !force_fresh => {
                    tracing::info!("forum asked for a login on the {mode} queue, retrying");
                    force_fresh = true;
                }
                other => return other,
            }
        }
    }

    async fn moderate(&self, post_id: u64, decision: &ForumDecision) -> BridgeResult<()> {
        let mut force_fresh = false;
        loop {
            let session = self.auth.session(force_fresh).await?;
            match moderate::moderate_once(&session, post_id, decision).await {
                Err(BridgeError::SessionInvalid(_)) if !force_fresh => {
                    tracing::warn!(
                        "forum session rejected while moderating post {post_id}, retrying"
                    );
                    force_fresh = true;
                }
                other => return other,
            }
        }
    }

    async fn ban_user(
        &self,
        user_id: u64,
        reviewer_name: &str,
        public_reason: &str,
    ) -> BridgeResult<()> {
        let mut retried = false;
        loop {
            let session = self.admin_session(retried).await?;
            match admin::ban_once(&session, user_id, reviewer_name, public_reason).await? {
                admin::BanAttempt::Banned => return Ok(()),
                admin::BanAttempt::NoQuickTools if !retried => {
                    tracing::warn!("user {user_id} admin page had no quick tools, retrying");
                    retried = true;
                }
                admin::BanAttempt::NoQuickTools => {
                    return Err(BridgeError::Upstream(
                        "Unable to find ban user quick tools".to_string(),
                    ));
                }
                admin::BanAttempt::Rejected(message) => {
                    return Err(BridgeError::Upstream(message));
                }
            }
        }
    }

    fn approve_details_url(&self, post_id: u64) -> String {
        approve_details_url(&self.base_url, post_id)
    }
}

pub fn approve_details_url(base_url: &str, post_id: u64) -> String {
    format!("{base_url}/mcp.php?i=queue&mode=approve_details&p={post_id}")
}
