//! Cookie-carrying session against one upstream platform.

use super::client::{HttpClient, HttpResponse, Method};
use super::cookies::CookieJar;
use crate::auth::store::{SessionCredential, SessionStore};
use crate::error::{BridgeError, BridgeResult};
use crate::platform::Platform;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

const MAX_REDIRECTS: usize = 5;

/// A fetched page after redirects.
#[derive(Debug, Clone)]
pub struct Page {
    /// URL of the last hop.
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl Page {
    pub fn html(&self) -> scraper::Html {
        scraper::Html::parse_document(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Resolve an href found on this page.
    pub fn absolute(&self, href: &str) -> String {
        join_href(&self.url, href)
    }
}

/// HTTP session whose cookie jar is written back to the [`SessionStore`]
/// after every response.
pub struct Session {
    platform: Platform,
    base_url: String,
    http: HttpClient,
    jar: Mutex<CookieJar>,
    store: Option<Arc<SessionStore>>,
}

// Cookies stay out of debug output.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("platform", &self.platform)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        platform: Platform,
        base_url: &str,
        http: HttpClient,
        jar: CookieJar,
        store: Option<Arc<SessionStore>>,
    ) -> Self {
        Self {
            platform,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            jar: Mutex::new(jar),
            store,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Snapshot of the current cookies.
    pub fn cookies(&self) -> CookieJar {
        self.lock_jar().clone()
    }

    pub fn cookie_by_affix(&self, prefix: &str, suffix: &str) -> Option<String> {
        self.lock_jar()
            .find_by_affix(prefix, suffix)
            .map(str::to_string)
    }

    /// Build an absolute URL for a path under the base URL.
    pub fn url(&self, path: &str) -> String {
        resolve_under_base(&self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> BridgeResult<Page> {
        let url = self.url(path);
        self.exchange(Method::Get, url, None).await
    }

    pub async fn post_form(&self, path: &str, fields: &[(String, String)]) -> BridgeResult<Page> {
        let url = self.url(path);
        self.exchange(Method::Post, url, Some(fields)).await
    }

    async fn exchange(
        &self,
        mut method: Method,
        mut url: String,
        mut form: Option<&[(String, String)]>,
    ) -> BridgeResult<Page> {
        for _ in 0..=MAX_REDIRECTS {
            let cookie_header = self.lock_jar().header_value();
            let resp = self
                .http
                .send(method, &url, cookie_header.as_deref(), form)
                .await?;
            self.absorb(&resp);

            if !resp.is_redirect() {
                return Ok(Page {
                    url,
                    status: resp.status,
                    body: resp.body,
                });
            }

            let location = resp.header("location").unwrap_or_default();
            let next = join_href(&url, location);
            tracing::debug!("{} redirect {} -> {next}", self.platform, resp.status);
            if !matches!(resp.status, 307 | 308) {
                method = Method::Get;
                form = None;
            }
            url = next;
        }

        Err(BridgeError::Upstream(format!(
            "too many redirects while fetching {url}"
        )))
    }

    fn absorb(&self, resp: &HttpResponse) {
        let snapshot = {
            let mut jar = self.lock_jar();
            for header in resp.set_cookies() {
                jar.absorb(header);
            }
            jar.clone()
        };

        if let Some(store) = &self.store {
            if snapshot.is_empty() {
                return;
            }
            let credential = SessionCredential::new(self.platform, snapshot);
            if let Err(e) = store.save(&credential) {
                tracing::warn!("failed to persist {} session: {e}", self.platform);
            }
        }
    }

    fn lock_jar(&self) -> MutexGuard<'_, CookieJar> {
        self.jar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Join a path onto a base URL that may itself carry a path prefix.
pub fn resolve_under_base(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    let path = path.strip_prefix('.').unwrap_or(path);
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Resolve an href relative to the page it was found on.
pub fn join_href(page_url: &str, href: &str) -> String {
    url::Url::parse(page_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}
