//! IP enrichment for forum review cards.
//!
//! Lookups go to ipinfo.io and are cached on disk, keyed by address, so a
//! repeat poster costs one request ever.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

const IPINFO_BASE_URL: &str = "https://ipinfo.io";

/// Where a post was made from, as shown on the card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpDetails {
    pub address: String,
    pub hostname: Option<String>,
    /// `city region country`.
    pub location: String,
    pub organization: String,
}

/// Subset of the ipinfo.io response we keep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub org: String,
}

impl IpInfo {
    pub fn location(&self) -> String {
        [self.city.as_str(), self.region.as_str(), self.country.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn details_for(&self, address: &str) -> IpDetails {
        IpDetails {
            address: address.to_string(),
            hostname: self.hostname.clone(),
            location: self.location(),
            organization: self.org.clone(),
        }
    }
}

#[async_trait]
pub trait IpLookup: Send + Sync {
    /// `None` when the address cannot be resolved; never an error.
    async fn lookup(&self, address: &str) -> Option<IpInfo>;
}

/// Lookup that never resolves anything.
pub struct NoIpLookup;

#[async_trait]
impl IpLookup for NoIpLookup {
    async fn lookup(&self, _address: &str) -> Option<IpInfo> {
        None
    }
}

pub struct IpInfoClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    cache_path: PathBuf,
    cache: Mutex<HashMap<String, IpInfo>>,
}

impl IpInfoClient {
    pub fn new(cache_path: PathBuf, token: Option<String>) -> Self {
        Self::with_base_url(IPINFO_BASE_URL, cache_path, token)
    }

    pub fn with_base_url(base_url: &str, cache_path: PathBuf, token: Option<String>) -> Self {
        let cache = match std::fs::read_to_string(&cache_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("discarding unreadable ip cache {}: {e}", cache_path.display());
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            cache_path,
            cache: Mutex::new(cache),
        }
    }

    async fn fetch(&self, address: &str) -> Result<IpInfo, reqwest::Error> {
        let mut request = self.client.get(format!("{}/{address}", self.base_url));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?.json::<IpInfo>().await
    }

    fn persist(&self, cache: &HashMap<String, IpInfo>) {
        let result = serde_json::to_vec(cache)
            .map_err(std::io::Error::from)
            .and_then(|bytes| {
                if let Some(parent) = self.cache_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&self.cache_path, bytes)
            });
        match result {
            Ok(()) => tracing::debug!("stored {} ip cache entries", cache.len()),
            Err(e) => tracing::warn!("failed to write ip cache: {e}"),
        }
    }
}

#[async_trait]
impl IpLookup for IpInfoClient {
    async fn lookup(&self, address: &str) -> Option<IpInfo> {
        if address.is_empty() {
            return None;
        }

        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.get(address) {
            return Some(hit.clone());
        }

        match self.fetch(address).await {
            Ok(info) => {
                cache.insert(address.to_string(), info.clone());
                self.persist(&cache);
                Some(info)
            }
            Err(e) => {
                tracing::warn!("ip lookup for {address} failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_location_skips_blank_parts() {
        let info = IpInfo {
            city: "Oslo".into(),
            country: "NO".into(),
            ..Default::default()
        };
        assert_eq!(info.location(), "Oslo NO");
    }

    #[tokio::test]
    async fn test_lookup_is_cached_on_disk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/203.0.113.7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ip": "203.0.113.7",
                "hostname": "host.example.net",
                "city": "Springfield",
                "region": "Oregon",
                "country": "US",
                "org": "AS64500 Example Net"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("ip.json");

        let client = IpInfoClient::with_base_url(&server.uri(), cache_path.clone(), None);
        let info = client.lookup("203.0.113.7").await.unwrap();
        assert_eq!(info.location(), "Springfield Oregon US");
        assert_eq!(client.lookup("203.0.113.7").await, Some(info.clone()));

        // A new client reads the cache instead of calling out again.
        let reloaded = IpInfoClient::with_base_url(&server.uri(), cache_path, None);
        assert_eq!(reloaded.lookup("203.0.113.7").await, Some(info));
    }

    #[tokio::test]
    async fn test_failed_lookup_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = IpInfoClient::with_base_url(&server.uri(), dir.path().join("ip.json"), None);
        assert!(client.lookup("198.51.100.1").await.is_none());
        assert!(NoIpLookup.lookup("198.51.100.1").await.is_none());
    }
}
