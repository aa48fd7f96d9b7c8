//! Automod hit-rate statistics over already decided requests.
//!
//! Biographies are classified again with the current rules, so the figures
//! show how today's classifier would have done on past decisions.

use crate::automod::{classify, SpamCategory};
use crate::error::BridgeResult;
use crate::ledger::{AccountRequestRecord, Ledger, ModAction};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomodStats {
    pub action: ModAction,
    pub total: usize,
    pub as_spam: usize,
    pub not_as_spam: usize,
    pub has_link: usize,
    pub has_non_ascii: usize,
    pub has_html: usize,
}

impl AutomodStats {
    pub fn from_records(action: ModAction, records: &[AccountRequestRecord]) -> Self {
        let mut stats = Self {
            action,
            total: records.len(),
            as_spam: 0,
            not_as_spam: 0,
            has_link: 0,
            has_non_ascii: 0,
            has_html: 0,
        };

        for record in records {
            let categories = classify(&record.request.biography);
            if categories.is_empty() {
                stats.not_as_spam += 1;
            }
            for category in categories {
                match category {
                    SpamCategory::HasLink => stats.has_link += 1,
                    SpamCategory::HasNonAscii => stats.has_non_ascii += 1,
                    SpamCategory::HasHtml => stats.has_html += 1,
                }
            }
        }
        stats.as_spam = stats.total - stats.not_as_spam;
        stats
    }

    /// Statistics over the automod-flagged requests resolved with `action`.
    pub fn collect(ledger: &Ledger, action: ModAction) -> BridgeResult<Self> {
        let records = ledger.flagged_accounts_resolved_as(action)?;
        Ok(Self::from_records(action, &records))
    }

    /// Percentage of requests the classifier got right: flagged among
    /// denials, unflagged among approvals. `None` with no requests.
    pub fn catch_rate(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let correct = match self.action {
            ModAction::Approved => self.not_as_spam,
            _ => self.as_spam,
        };
        Some(correct as f64 * 100.0 / self.total as f64)
    }

    pub fn render(&self) -> String {
        let catch = match self.catch_rate() {
            Some(rate) => format!("{rate:.2}"),
            None => "No Requests".to_string(),
        };
        let rows = [
            ("action", self.action.label().to_string()),
            ("total", self.total.to_string()),
            ("catch_%", catch),
            ("not_as_spam", self.not_as_spam.to_string()),
            ("as_spam", self.as_spam.to_string()),
            ("has_link", self.has_link.to_string()),
            ("has_non_ascii", self.has_non_ascii.to_string()),
            ("has_html", self.has_html.to_string()),
        ];
        text_table("AutoMod Stats", &rows, "End of Stats")
    }
}

/// Key/value table framed by `=` rules carrying a header and a footer.
fn text_table(header: &str, rows: &[(&str, String)], footer: &str) -> String {
    let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let value_width = rows.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    let width = (key_width + value_width + 4)
        .max(header.len() + 4)
        .max(footer.len() + 4);

    let mut out = String::new();
    let _ = writeln!(out, "{}", rule(header, width));
    for (key, value) in rows {
        let _ = writeln!(out, "{key:<key_width$}  {value:>w$}", w = width - key_width - 2);
    }
    out.push_str(&rule(footer, width));
    out
}

fn rule(label: &str, width: usize) -> String {
    let label = format!(" {label} ");
    let left = width.saturating_sub(label.len()) / 2;
    let right = width.saturating_sub(label.len() + left);
    format!("{}{label}{}", "=".repeat(left), "=".repeat(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Moderator;
    use crate::wiki::WikiAccountRequest;
    use chrono::Utc;

    fn seed(ledger: &Ledger, acrid: u64, stored_bio: &str, action: ModAction) {
        let request = WikiAccountRequest {
            acrid,
            source_ref: String::new(),
            requested_at: Utc::now(),
            username: format!("u{acrid}"),
            name: String::new(),
            email: String::new(),
            biography: stored_bio.into(),
        };
        let id = ledger
            .insert_account(&request, None, &classify("<i>flagged</i>"), Utc::now())
            .unwrap();
        ledger
            .resolve_account(id, action, &Moderator::new(1, "modbridge"), Utc::now())
            .unwrap();
    }

    #[test]
    fn test_counts_denied_requests() {
        let ledger = Ledger::open_in_memory().unwrap();
        seed(&ledger, 1, "visit https://spam.example.com <b>now</b>", ModAction::Denied);
        seed(&ledger, 2, "caf\u{e9}", ModAction::Denied);
        seed(&ledger, 3, "plain text", ModAction::Denied);
        seed(&ledger, 4, "<p>approved anyway</p>", ModAction::Approved);

        let stats = AutomodStats::collect(&ledger, ModAction::Denied).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.as_spam, 2);
        assert_eq!(stats.not_as_spam, 1);
        assert_eq!(stats.has_link, 1);
        assert_eq!(stats.has_html, 1);
        assert_eq!(stats.has_non_ascii, 1);
        let rate = stats.catch_rate().unwrap();
        assert!((rate - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_approved_catch_rate_counts_clean_requests() {
        let stats = AutomodStats {
            action: ModAction::Approved,
            total: 4,
            as_spam: 1,
            not_as_spam: 3,
            has_link: 1,
            has_non_ascii: 0,
            has_html: 0,
        };
        assert_eq!(stats.catch_rate(), Some(75.0));
    }

    #[test]
    fn test_render_empty() {
        let ledger = Ledger::open_in_memory().unwrap();
        let table = AutomodStats::collect(&ledger, ModAction::Denied)
            .unwrap()
            .render();
        assert!(table.starts_with('='));
        assert!(table.contains("AutoMod Stats"));
        assert!(table.contains("No Requests"));
        assert!(table.lines().any(|l| l.starts_with("action") && l.ends_with("denied")));
        assert!(table.trim_end().ends_with('='));
    }
}
