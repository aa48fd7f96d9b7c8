//! Moderation queue extraction.
//!
//! A queue row only carries the topic, forum, author and post time. Each
//! row is enriched from three more pages, fetched one after another: the
//! moderator post view (IP address, body), the author profile, and for
//! replies the topic itself (when a post was last approved there).

use super::login::is_login_prompt;
use super::{AuthorStats, ForumPost, ForumQueue, QueueMode};
use crate::error::{BridgeError, BridgeResult};
use crate::geo::{IpDetails, IpLookup};
use crate::html::{self, sel, text_of};
use crate::http::session::join_href;
use crate::http::Session;
use crate::pending::{collect_pages, ListingPage};
use crate::platform::Platform;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use std::sync::OnceLock;

const TOPIC_PAGE_SIZE: u32 = 10;
const WARNINGS_SUFFIX: &str = "[ View user notes | Warn user ]";

/// One row of the queue table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub post_id: u64,
    pub topic_name: String,
    pub topic_url: String,
    pub forum_name: String,
    pub forum_url: String,
    pub author_name: String,
    pub author_url: String,
    pub author_id: u64,
    pub post_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetails {
    pub ip_address: String,
    pub text: String,
}

fn ordinal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)(st|nd|rd|th)\b").expect("ordinal pattern is valid"))
}

fn page_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Page (\d+) of (\d+)").expect("page pattern is valid"))
}

/// Parse phpBB's `January 5th, 2024, 3:04 pm` (board timezone set to UTC).
pub fn parse_forum_date(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = ordinal_re().replace_all(raw.trim(), "$1");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&cleaned, "%B %d, %Y, %I:%M %p")
        .ok()
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

// ── Queue listing ────────────────────────────────────────────────────────────

pub fn queue_path(mode: QueueMode) -> String {
    format!("/mcp.php?i=mcp_queue&mode={}", mode.as_param())
}

/// Parse one queue page. Rows missing required cells are skipped.
pub fn parse_queue(doc: &Html, page_url: &str) -> BridgeResult<ListingPage<QueueRow>> {
    let Some(mcp) = html::first(doc, "#mcp") else {
        if is_login_prompt(doc) {
            return Err(BridgeError::SessionInvalid(Platform::Forum));
        }
        return Err(BridgeError::Layout(
            "Unable to access moderator control panel".to_string(),
        ));
    };

    let mut rows = Vec::new();
    for tr in mcp.select(&sel("tr")) {
        let is_row = tr
            .value()
            .classes()
            .any(|class| class == "row1" || class == "row2");
        if !is_row {
            continue;
        }
        match parse_queue_row(tr, page_url) {
            Some(row) => rows.push(row),
            None => tracing::warn!("skipping unparseable queue row: {}", text_of(tr)),
        }
    }

    let next_page = doc
        .select(&sel("a[href]"))
        .find(|a| text_of(*a) == "Next")
        .and_then(|a| a.value().attr("href"))
        .map(|href| join_href(page_url, href));

    Ok(ListingPage {
        items: rows,
        next_page,
    })
}

fn parse_queue_row(tr: ElementRef<'_>, page_url: &str) -> Option<QueueRow> {
    let cells: Vec<ElementRef<'_>> = tr.select(&sel("td")).collect();
    if cells.len() < 3 {
        return None;
    }

    let title = html::first_in(cells[0], ".topictitle")?;
    let topic_href = title.value().attr("href")?;
    let post_id = html::query_param(topic_href, "p")?.parse::<u64>().ok()?;

    let forum_span = html::first_in(cells[0], "span");
    let forum_name = forum_span
        .map(|span| text_of(span).trim_start_matches("Forum:").trim().to_string())
        .unwrap_or_default();
    let forum_url = forum_span
        .and_then(|span| html::first_in(span, "a"))
        .and_then(|a| a.value().attr("href"))
        .map(|href| join_href(page_url, href))
        .unwrap_or_default();

    let author = html::first_in(cells[1], "a")?;
    let author_href = author.value().attr("href")?;
    let author_id = html::query_param(author_href, "u")?.parse::<u64>().ok()?;

    let post_time = parse_forum_date(&text_of(cells[2]))?;

    Some(QueueRow {
        post_id,
        topic_name: text_of(title),
        topic_url: join_href(page_url, topic_href),
        forum_name,
        forum_url,
        author_name: text_of(author),
        author_url: join_href(page_url, author_href),
        author_id,
        post_time,
    })
}

// ── Detail pages ─────────────────────────────────────────────────────────────

pub fn approve_details_path(post_id: u64) -> String {
    format!("/mcp.php?i=queue&mode=approve_details&p={post_id}")
}

/// IP address and body from the moderator post view. `None` when the page
/// has no post form (post already handled, or no access).
pub fn parse_post_details(doc: &Html) -> Option<PostDetails> {
    let form = html::first(doc, "form")?;
    let rows: Vec<ElementRef<'_>> = form.select(&sel("tr")).collect();

    let ip_address = html::first_in(*rows.get(3)?, "span")
        .map(text_of)?
        .trim_end_matches("(Look up IP)")
        .trim()
        .to_string();

    let body = html::first_in(*rows.get(6)?, ".postbody")?;
    let text = post_body_text(body);

    Some(PostDetails {
        ip_address,
        text: html::fold_quotes(&text),
    })
}

/// The post body, skipping a leading quote of the post being replied to.
fn post_body_text(body: ElementRef<'_>) -> String {
    let mut children = body
        .children()
        .filter(|child| match child.value() {
            Node::Text(text) => !text.trim().is_empty(),
            _ => true,
        })
        .peekable();

    let leads_with_quote = children
        .peek()
        .and_then(|child| child.value().as_element())
        .map(|el| el.name() == "blockquote")
        .unwrap_or(false);
    if leads_with_quote {
        children.next();
    }

    match children.next() {
        Some(child) => match child.value() {
            Node::Text(text) => text.trim().to_string(),
            _ => ElementRef::wrap(child)
                .map(|el| el.html().trim().to_string())
                .unwrap_or_default(),
        },
        None => String::new(),
    }
}

/// Statistics block of a member profile. Missing figures default to zero.
pub fn parse_author_profile(doc: &Html) -> AuthorStats {
    let mut stats = AuthorStats::default();
    let Some(form) = html::first(doc, "form") else {
        return stats;
    };

    if let Some(block) = form.select(&sel(".row1")).nth(1) {
        let rows: Vec<ElementRef<'_>> = block.select(&sel("tr")).collect();
        let value_cell = |index: usize| {
            rows.get(index)
                .and_then(|row| row.select(&sel("td")).nth(1))
        };

        stats.join_date = value_cell(0).and_then(|td| parse_forum_date(&text_of(td)));
        stats.warning_count = value_cell(2)
            .map(|td| text_of(td).trim_end_matches(WARNINGS_SUFFIX).trim().to_string())
            .and_then(|raw| leading_number(&raw))
            .unwrap_or(0);
        stats.post_count = value_cell(3)
            .and_then(|td| html::first_in(td, ".gen"))
            .and_then(|gen| leading_number(&text_of(gen)))
            .unwrap_or(0);
    }

    stats.groups = form
        .select(&sel("tr"))
        .find(|tr| {
            html::first_in(*tr, "td")
                .map(|td| text_of(td) == "Groups:")
                .unwrap_or(false)
        })
        .and_then(|tr| html::first_in(tr, "select"))
        .map(|select| {
            select
                .select(&sel("option"))
                .map(text_of)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    stats
}

fn leading_number(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Topic id from the header link of a topic page.
pub fn parse_topic_id(doc: &Html) -> Option<u64> {
    let href = html::first(doc, "#pageheader a")?.value().attr("href")?;
    html::query_param(href, "t")?.parse().ok()
}

/// Total pages of a topic, from the `Page X of Y` navigation.
pub fn parse_page_count(doc: &Html) -> u32 {
    doc.select(&sel(".nav"))
        .find_map(|nav| {
            let text = text_of(nav);
            let caps = page_count_re().captures(&text)?;
            caps.get(2)?.as_str().parse::<u32>().ok()
        })
        .unwrap_or(1)
        .max(1)
}

/// Date of the last approved post on one topic page.
pub fn parse_last_approved(doc: &Html) -> Option<DateTime<Utc>> {
    let posts: Vec<ElementRef<'_>> = doc
        .select(&sel("table.tablebg[width=\"100%\"][cellspacing=\"1\"]"))
        .collect();

    posts.into_iter().rev().find_map(|table| {
        if html::first_in(table, "div.postbody").is_none() {
            return None;
        }
        if html::first_in(table, "span.postapprove").is_some() {
            return None;
        }
        let info = text_of(html::first_in(table, "td.gensmall")?);
        let (_, posted) = info.rsplit_once("Posted:")?;
        parse_forum_date(posted)
    })
}

// ── Orchestration ────────────────────────────────────────────────────────────

/// Walk a whole queue and enrich every row.
pub async fn fetch_queue(
    session: &Session,
    mode: QueueMode,
    geo: &dyn IpLookup,
) -> BridgeResult<ForumQueue> {
    let rows = collect_pages(session.url(&queue_path(mode)), |url| async move {
        let page = session.get(&url).await?;
        let doc = page.html();
        parse_queue(&doc, &page.url)
    })
    .await?;

    let mut queue = ForumQueue {
        posts: Vec::with_capacity(rows.len()),
        skipped: Vec::new(),
    };
    for row in rows {
        let post_id = row.post_id;
        match enrich(session, mode, geo, row).await {
            Ok(post) => queue.posts.push(post),
            Err(BridgeError::ExtractionSkip(reason)) => {
                tracing::warn!("skipping forum {mode} {post_id}: {reason}");
                queue.skipped.push(post_id);
            }
            Err(e) => return Err(e),
        }
    }

    tracing::debug!(
        "forum {mode} queue has {} item(s), {} skipped",
        queue.posts.len(),
        queue.skipped.len()
    );
    Ok(queue)
}

async fn enrich(
    session: &Session,
    mode: QueueMode,
    geo: &dyn IpLookup,
    row: QueueRow,
) -> BridgeResult<ForumPost> {
    let page = session.get(&approve_details_path(row.post_id)).await?;
    let details = parse_post_details(&page.html())
        .ok_or_else(|| BridgeError::ExtractionSkip("no post form on the detail page".into()))?;

    let page = session.get(&row.author_url).await?;
    if !page.is_success() {
        return Err(BridgeError::ExtractionSkip(format!(
            "author profile returned HTTP {}",
            page.status
        )));
    }
    let author = parse_author_profile(&page.html());

    let ip = match geo.lookup(&details.ip_address).await {
        Some(info) => info.details_for(&details.ip_address),
        None => IpDetails {
            address: details.ip_address.clone(),
            ..IpDetails::default()
        },
    };

    let last_approved_post_date = match mode {
        QueueMode::Posts => match last_approved_in_topic(session, &row.topic_url).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("no last approved date for post {}: {e}", row.post_id);
                None
            }
        },
        QueueMode::Topics => None,
    };

    Ok(ForumPost {
        post_id: row.post_id,
        mode,
        topic_name: row.topic_name,
        topic_url: row.topic_url,
        forum_name: row.forum_name,
        forum_url: row.forum_url,
        author_name: row.author_name,
        author_url: row.author_url,
        author_id: row.author_id,
        post_time: row.post_time,
        ip,
        post_text: details.text,
        author,
        last_approved_post_date,
    })
}

/// Walk a topic from its last page backwards to find the newest approved
/// post.
async fn last_approved_in_topic(
    session: &Session,
    topic_url: &str,
) -> BridgeResult<Option<DateTime<Utc>>> {
    let page = session.get(topic_url).await?;
    let topic_id = parse_topic_id(&page.html())
        .ok_or_else(|| BridgeError::ExtractionSkip("topic page has no header link".into()))?;

    let first = session.get(&format!("/viewtopic.php?t={topic_id}")).await?;
    let (pages, on_first) = {
        let doc = first.html();
        (parse_page_count(&doc), parse_last_approved(&doc))
    };

    for page_number in (1..=pages).rev() {
        let found = if page_number == 1 {
            on_first
        } else {
            let start = (page_number - 1) * TOPIC_PAGE_SIZE;
            let page = session
                .get(&format!("/viewtopic.php?t={topic_id}&start={start}"))
                .await?;
            parse_last_approved(&page.html())
        };
        if found.is_some() {
            return Ok(found);
        }
    }

    tracing::warn!("unable to find last post date for topic {topic_id}");
    Ok(None)
}
