//! MediaWiki ConfirmAccount integration: login, request listing, and
//! accept/reject replay.

pub mod extract;
pub mod login;
pub mod moderate;

use crate::auth::{Authenticator, SessionStore};
use crate::config::Credentials;
use crate::error::{BridgeError, BridgeResult};
use crate::http::HttpClient;
use crate::pending::{collect_pages, PendingItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use login::WikiLogin;

/// Pending-requests listing, held requests excluded.
pub const LISTING_PATH: &str = "/index.php?title=Special:ConfirmAccounts/authors&wpShowHeld=0";

/// An account request waiting on `Special:ConfirmAccounts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiAccountRequest {
    pub acrid: u64,
    /// Review link as found on the listing page.
    pub source_ref: String,
    pub requested_at: DateTime<Utc>,
    pub username: String,
    pub name: String,
    pub email: String,
    pub biography: String,
}

impl PendingItem for WikiAccountRequest {
    fn native_id(&self) -> u64 {
        self.acrid
    }

    fn source_ref(&self) -> &str {
        &self.source_ref
    }
}

/// What the sync engine needs from the wiki.
#[async_trait]
pub trait WikiBackend: Send + Sync {
    /// Every pending request, all listing pages walked.
    async fn pending_requests(&self) -> BridgeResult<Vec<WikiAccountRequest>>;

    /// Accept (`approved`) or reject as spam.
    async fn moderate(&self, request: &WikiAccountRequest, approved: bool) -> BridgeResult<()>;

    /// Absolute URL of a request's review page.
    fn request_url(&self, acrid: u64) -> String;
}

pub struct WikiClient {
    auth: Authenticator<WikiLogin>,
    base_url: String,
}

impl WikiClient {
    pub fn new(credentials: &Credentials, http: HttpClient, store: Arc<SessionStore>) -> Self {
        let flow = WikiLogin::new(&credentials.username, &credentials.password);
        Self {
            auth: Authenticator::new(flow, store, http, &credentials.base_url),
            base_url: credentials.base_url.clone(),
        }
    }

    pub fn authenticator(&self) -> &Authenticator<WikiLogin> {
        &self.auth
    }
}

#[async_trait]
impl WikiBackend for WikiClient {
    async fn pending_requests(&self) -> BridgeResult<Vec<WikiAccountRequest>> {
        let session = self.auth.session(false).await?;
        let session = &session;
        collect_pages(session.url(LISTING_PATH), |url| async move {
            let page = session.get(&url).await?;
            extract::parse_listing(&page)
        })
        .await
    }

    async fn moderate(&self, request: &WikiAccountRequest, approved: bool) -> BridgeResult<()> {
        let mut force_fresh = false;
        loop {
            let session = self.auth.session(force_fresh).await?;
            match moderate::moderate_once(&session, request, approved).await {
                Err(BridgeError::SessionInvalid(_)) if !force_fresh => {
                    tracing::warn!(
                        "wiki session rejected while moderating {}, retrying with a fresh login",
                        request.acrid
                    );
                    force_fresh = true;
                }
                other => return other,
            }
        }
    }

    fn request_url(&self, acrid: u64) -> String {
        request_url(&self.base_url, acrid)
    }
}

pub fn request_url(base_url: &str, acrid: u64) -> String {
    format!("{base_url}/index.php?title=Special:ConfirmAccounts/authors&acrid={acrid}")
}
