//! Async HTTP client wrapping reqwest.
//!
//! Redirects are *not* followed here. phpBB and MediaWiki both set cookies
//! on the 302 that ends a login, so [`super::Session`] walks redirects
//! itself and absorbs every hop's `Set-Cookie` headers.

use crate::error::BridgeResult;
use std::time::Duration;

const MAX_RETRIES: u32 = 2;

/// One HTTP exchange, before redirect handling.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Requested URL.
    pub url: String,
    pub status: u16,
    /// All response headers, lower-cased names.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(|(k, _)| k == "set-cookie")
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308) && self.header("location").is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Shared HTTP client. Cheap to clone.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout_ms: u64) -> Self {
        let ua = format!("modbridge v{}", env!("CARGO_PKG_VERSION"));
        let timeout = Duration::from_millis(timeout_ms);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(ua)
            .build()
            .unwrap_or_default();

        Self { client, timeout }
    }

    /// Send one request. GETs are retried on 5xx and backed off on 429;
    /// form POSTs are sent exactly once.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        cookie_header: Option<&str>,
        form: Option<&[(String, String)]>,
    ) -> BridgeResult<HttpResponse> {
        let mut retries = 0u32;

        loop {
            let mut builder = match method {
                Method::Get => self.client.get(url),
                Method::Post => self.client.post(url),
            }
            .timeout(self.timeout);

            if let Some(cookies) = cookie_header {
                builder = builder.header(reqwest::header::COOKIE, cookies);
            }
            if let Some(fields) = form {
                builder = builder.form(fields);
            }

            let resp = match builder.send().await {
                Ok(r) => r,
                Err(e) if method == Method::Get && retries < MAX_RETRIES => {
                    retries += 1;
                    tracing::debug!("GET {url} failed ({e}), retry {retries}/{MAX_RETRIES}");
                    tokio::time::sleep(backoff(retries)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = resp.status().as_u16();

            if method == Method::Get && retries < MAX_RETRIES {
                if status >= 500 {
                    retries += 1;
                    tokio::time::sleep(backoff(retries)).await;
                    continue;
                }
                if status == 429 {
                    retries += 1;
                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(2);
                    tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                    continue;
                }
            }

            let headers: Vec<(String, String)> = resp
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();
            let body = resp.text().await.unwrap_or_default();

            return Ok(HttpResponse {
                url: url.to_string(),
                status,
                headers,
                body,
            });
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, headers: &[(&str, &str)]) -> HttpResponse {
        HttpResponse {
            url: "https://example.net/".into(),
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: String::new(),
        }
    }

    #[test]
    fn test_redirect_needs_location() {
        assert!(response(302, &[("location", "/index.php")]).is_redirect());
        assert!(!response(302, &[]).is_redirect());
        assert!(!response(200, &[("location", "/index.php")]).is_redirect());
    }

    #[test]
    fn test_set_cookies_collects_every_header() {
        let resp = response(
            200,
            &[
                ("set-cookie", "a=1"),
                ("content-type", "text/html"),
                ("set-cookie", "b=2"),
            ],
        );
        assert_eq!(resp.set_cookies().collect::<Vec<_>>(), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_millis(1000));
    }
}
