//! Minimal cookie jar for a single upstream host.
//!
//! Both platforms keep their whole login state in a handful of cookies, and
//! phpBB rotates its `_sid` cookie on almost every response, so the jar is a
//! plain name → value map that absorbs every `Set-Cookie` it sees.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(cookies: BTreeMap<String, String>) -> Self {
        Self { cookies }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First cookie whose name starts with `prefix` and ends with `suffix`.
    pub fn find_by_affix(&self, prefix: &str, suffix: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(name, _)| name.starts_with(prefix) && name.ends_with(suffix))
            .map(|(_, value)| value.as_str())
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.cookies
    }

    /// Apply one `Set-Cookie` header value. Returns true if the jar changed.
    pub fn absorb(&mut self, header: &str) -> bool {
        let mut parts = header.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return false;
        };
        let name = name.trim();
        let value = value.trim().trim_matches('"');
        if name.is_empty() {
            return false;
        }

        let expired = parts.any(|attr| {
            let attr = attr.trim();
            match attr.split_once('=') {
                Some((key, val)) if key.trim().eq_ignore_ascii_case("max-age") => {
                    val.trim().parse::<i64>().map(|n| n <= 0).unwrap_or(false)
                }
                Some((key, val)) if key.trim().eq_ignore_ascii_case("expires") => {
                    is_past_http_date(val.trim())
                }
                _ => false,
            }
        });

        if expired || value.is_empty() || value == "deleted" {
            return self.cookies.remove(name).is_some();
        }
        self.cookies.insert(name.to_string(), value.to_string()) != Some(value.to_string())
    }

    /// Render as a `Cookie` request header value.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

fn is_past_http_date(raw: &str) -> bool {
    chrono::DateTime::parse_from_rfc2822(&raw.replace('-', " "))
        .map(|when| when < chrono::Utc::now())
        .unwrap_or(false)
}
