//! Spam triage for wiki account requests.
//!
//! Each rule fires independently; a request is flagged when any rule fires.
//! The result is stored on the ledger record as a comma-joined string.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpamCategory {
    HasLink,
    HasNonAscii,
    HasHtml,
}

impl SpamCategory {
    pub const ALL: [SpamCategory; 3] = [Self::HasLink, Self::HasNonAscii, Self::HasHtml];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HasLink => "HAS_LINK",
            Self::HasNonAscii => "HAS_NON_ASCII",
            Self::HasHtml => "HAS_HTML",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw.trim())
    }
}

impl fmt::Display for SpamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"https?://(www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b[-a-zA-Z0-9()@:%_+.~#?&/=]*",
        )
        .expect("link pattern is valid")
    })
}

fn non_ascii_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\x00-\x7F\u{2018}\u{2019}]+").expect("non-ascii pattern is valid"))
}

fn html_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("html pattern is valid"))
}

/// Classify free text. Empty set means clean.
pub fn classify(text: &str) -> BTreeSet<SpamCategory> {
    let mut categories = BTreeSet::new();
    if link_re().is_match(text) {
        categories.insert(SpamCategory::HasLink);
    }
    if non_ascii_re().is_match(text) {
        categories.insert(SpamCategory::HasNonAscii);
    }
    if html_re().is_match(text) {
        categories.insert(SpamCategory::HasHtml);
    }
    categories
}

/// `HAS_LINK,HAS_HTML` form used in the ledger and in notices.
pub fn join_categories(categories: &BTreeSet<SpamCategory>) -> String {
    categories
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`join_categories`]; unknown names are dropped.
pub fn parse_categories(raw: &str) -> BTreeSet<SpamCategory> {
    raw.split(',').filter_map(SpamCategory::parse).collect()
}
