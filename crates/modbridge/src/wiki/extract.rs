//! Parse `Special:ConfirmAccounts` listing pages.
//!
//! Each request is rendered twice: once as a list item carrying the review
//! link and request timestamp, once as a detail table (class
//! `mw-confirmaccount-body-0`) carrying the submitted fields. The two are
//! paired by position.

use super::WikiAccountRequest;
use crate::error::BridgeResult;
use crate::html::{self, sel, text_of};
use crate::http::Page;
use crate::pending::ListingPage;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::OnceLock;

const FIELD_KEYS: [&str; 4] = ["Username", "Name", "Email", "Biography"];

#[derive(Debug, Default)]
struct RequestFields {
    username: String,
    name: String,
    email: String,
    biography: String,
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(20\d\d-\d\d-\d\dT\d\d:\d\d:\d\d)").expect("timestamp pattern is valid")
    })
}

pub fn parse_listing(page: &Page) -> BridgeResult<ListingPage<WikiAccountRequest>> {
    let doc = page.html();
    Ok(parse_listing_html(&doc, |href| page.absolute(href)))
}

/// Parse a listing document; `resolve` turns hrefs into absolute URLs.
pub fn parse_listing_html<R>(doc: &Html, resolve: R) -> ListingPage<WikiAccountRequest>
where
    R: Fn(&str) -> String,
{
    let tables: Vec<RequestFields> = doc
        .select(&sel("table.mw-confirmaccount-body-0"))
        .map(parse_fields)
        .collect();

    if tables.is_empty() {
        return ListingPage::last(Vec::new());
    }

    let entries: Vec<ElementRef<'_>> = doc
        .select(&sel("li"))
        .filter(|li| html::first_in(*li, "a[href*=\"acrid=\"]").is_some())
        .collect();

    if entries.len() != tables.len() {
        tracing::warn!(
            "wiki listing has {} request links but {} detail tables",
            entries.len(),
            tables.len()
        );
    }

    let mut items = Vec::new();
    for (entry, fields) in entries.into_iter().zip(tables) {
        match parse_entry(entry, fields) {
            Some(item) => items.push(item),
            None => tracing::warn!("skipping malformed wiki request entry: {}", text_of(entry)),
        }
    }

    let next_page = html::first(doc, "[rel=\"next\"]")
        .and_then(|a| a.value().attr("href"))
        .map(|href| resolve(href));

    ListingPage { items, next_page }
}

fn parse_entry(entry: ElementRef<'_>, fields: RequestFields) -> Option<WikiAccountRequest> {
    let href = html::first_in(entry, "a[href*=\"acrid=\"]")?
        .value()
        .attr("href")?
        .to_string();
    let acrid = html::query_param(&href, "acrid")?.parse::<u64>().ok()?;

    let text = html::raw_text_of(entry);
    let stamp = timestamp_re().captures(&text)?.get(1)?.as_str().to_string();
    let requested_at = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))?;

    Some(WikiAccountRequest {
        acrid,
        source_ref: href,
        requested_at,
        username: fields.username,
        name: fields.name,
        email: fields.email,
        biography: fields.biography,
    })
}

fn parse_fields(table: ElementRef<'_>) -> RequestFields {
    let mut fields = RequestFields::default();
    for row in table.select(&sel("tr")) {
        let Some((key, value)) = row_field(row) else {
            continue;
        };
        match key {
            "Username" => fields.username = value,
            "Name" => fields.name = value,
            "Email" => fields.email = value,
            "Biography" => fields.biography = value,
            _ => {}
        }
    }
    fields
}

/// Split a detail row into one of [`FIELD_KEYS`] and its value.
fn row_field(row: ElementRef<'_>) -> Option<(&'static str, String)> {
    let cells: Vec<ElementRef<'_>> = row.select(&sel("td, th")).collect();

    if cells.len() >= 2 {
        let label = text_of(cells[0]);
        let key = FIELD_KEYS.into_iter().find(|k| label.starts_with(k))?;
        let value = cells[1..]
            .iter()
            .map(|c| html::raw_text_of(*c))
            .collect::<Vec<_>>()
            .join(" ");
        return Some((key, value.trim().to_string()));
    }

    let text = html::raw_text_of(row);
    let text = text.trim_start();
    let key = FIELD_KEYS.into_iter().find(|k| text.starts_with(k))?;
    let value = text[key.len()..].trim_start_matches(':').trim();
    Some((key, value.to_string()))
}
