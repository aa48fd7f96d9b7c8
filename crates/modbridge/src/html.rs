//! Small helpers over `scraper` shared by the extractors and login flows.

use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

/// Parse a selector literal.
pub fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector literal {css:?}: {e:?}"))
}

/// Whitespace-collapsed text content.
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Raw text content, whitespace preserved.
pub fn raw_text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

pub fn first<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    doc.select(&sel(css)).next()
}

pub fn first_in<'a>(el: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    el.select(&sel(css)).next()
}

pub fn first_text(doc: &Html, css: &str) -> Option<String> {
    first(doc, css).map(text_of)
}

pub fn has(doc: &Html, css: &str) -> bool {
    first(doc, css).is_some()
}

/// Every named `<input>` inside a form, keyed by name.
pub fn form_fields(form: ElementRef<'_>) -> BTreeMap<String, String> {
    let inputs = sel("input[name]");
    form.select(&inputs)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or("");
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Value of one named input inside a form.
pub fn input_value(scope: ElementRef<'_>, name: &str) -> Option<String> {
    let input = scope
        .select(&sel("input[name]"))
        .find(|i| i.value().attr("name") == Some(name))?;
    Some(input.value().attr("value").unwrap_or("").to_string())
}

/// Value of a query-string parameter in an href (absolute or relative).
pub fn query_param(href: &str, name: &str) -> Option<String> {
    let query = href.split_once('?').map(|(_, q)| q).unwrap_or(href);
    let query = query.split('#').next().unwrap_or("");
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Fold typographic single quotes to ASCII. Other non-ASCII is left alone.
pub fn fold_quotes(text: &str) -> String {
    text.replace(['\u{2018}', '\u{2019}'], "'")
}

/// Truncate to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
