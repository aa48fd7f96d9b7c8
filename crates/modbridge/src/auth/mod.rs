//! Session acquisition: reuse a stored session when it still validates,
//! otherwise run the platform's login handshake.

pub mod store;

use crate::error::BridgeResult;
use crate::http::{CookieJar, HttpClient, Session};
use crate::platform::Platform;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use store::{SessionCredential, SessionStore};

/// Minimum wait before submitting a login or admin form to the forum.
/// phpBB rejects forms submitted faster than this.
pub const FORM_SUBMIT_DELAY: Duration = Duration::from_secs(3);

/// Platform-specific half of the login protocol.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    fn platform(&self) -> Platform;

    /// One authenticated-only request; true when the session is logged in.
    async fn validate(&self, session: &Session) -> BridgeResult<bool>;

    /// Run the interactive handshake on a cookie-less session.
    async fn login(&self, session: &Session) -> BridgeResult<()>;
}

pub struct Authenticator<F> {
    flow: F,
    store: Arc<SessionStore>,
    http: HttpClient,
    base_url: String,
}

impl<F: LoginFlow> Authenticator<F> {
    pub fn new(flow: F, store: Arc<SessionStore>, http: HttpClient, base_url: &str) -> Self {
        Self {
            flow,
            store,
            http,
            base_url: base_url.to_string(),
        }
    }

    pub fn flow(&self) -> &F {
        &self.flow
    }

    pub fn platform(&self) -> Platform {
        self.flow.platform()
    }

    /// Return a logged-in session.
    ///
    /// Unless `force_fresh` is set, the stored session is tried first and
    /// returned as-is when it validates. Otherwise the stored credential is
    /// discarded and a new login is performed.
    pub async fn session(&self, force_fresh: bool) -> BridgeResult<Session> {
        let platform = self.platform();

        if force_fresh {
            self.store.invalidate(platform)?;
        } else if let Some(credential) = self.store.load(platform)? {
            let session = self.session_with(credential.cookies);
            if self.flow.validate(&session).await? {
                tracing::debug!("reusing stored {platform} session");
                return Ok(session);
            }
            tracing::info!("stored {platform} session expired, logging in again");
            self.store.invalidate(platform)?;
        }

        let session = self.session_with(CookieJar::new());
        self.flow.login(&session).await?;
        tracing::info!("logged in to {platform}");
        Ok(session)
    }

    fn session_with(&self, cookies: CookieJar) -> Session {
        Session::new(
            self.platform(),
            &self.base_url,
            self.http.clone(),
            cookies,
            Some(self.store.clone()),
        )
    }
}
