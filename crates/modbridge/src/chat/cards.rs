//! Review cards and notices rendered for the chat surface.

use super::Embed;
use crate::automod::{join_categories, SpamCategory};
use crate::forum::{ForumPost, QueueMode};
use crate::html::{fold_quotes, truncate_chars};
use crate::wiki::WikiAccountRequest;
use std::collections::BTreeSet;

pub const CARD_COLOR: u32 = 0x00FBFF;
/// Free-text fields are cut to this many characters.
pub const BODY_LIMIT: usize = 200;

const LAST_APPROVED_MISSING: &str = "Failed to find most recently approved reply. Check yourself!";

/// Chat embeds reject empty field values.
fn shown(value: &str) -> String {
    if value.trim().is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

pub fn account_card(request: &WikiAccountRequest, request_url: &str) -> Embed {
    let mut embed = Embed::new(format!("Wiki Account Request ({})", request.acrid))
        .field("Username", shown(&request.username), true)
        .field("Name", shown(&request.name), true)
        .field("Email", shown(&request.email), false)
        .field(
            "Biography",
            shown(&truncate_chars(&fold_quotes(&request.biography), BODY_LIMIT)),
            false,
        );
    embed.url = Some(request_url.to_string());
    embed.timestamp = Some(request.requested_at);
    embed.color = Some(CARD_COLOR);
    embed
}

/// Read-only notice for a request automod kept out of the review channel.
pub fn automod_notice(acrid: u64, request_url: &str, categories: &BTreeSet<SpamCategory>) -> Embed {
    let mut embed = Embed::new("Automod");
    embed.description = format!(
        "[account request {acrid}]({request_url}) was detected by automod with result {}.\n\
         Account will be autorejected in 48 hours, run `/review-wiki-account {acrid}` to send it \
         to the manual review channel instead.",
        join_categories(categories)
    );
    embed
}

pub fn forum_card(post: &ForumPost, approve_url: &str) -> Embed {
    let subject = match post.mode {
        QueueMode::Topics => "Topic",
        QueueMode::Posts => "Post",
    };

    let mut embed = Embed::new(format!("Forum {subject} Approval ({})", post.post_id))
        .field("Username", shown(&post.author_name), false)
        .field("IP Address", shown(&post.ip.address), false)
        .field(
            "IP Location & Provider",
            format!("{} | {}", post.ip.location, post.ip.organization),
            false,
        )
        .field("Groups", shown(&post.author.groups), false)
        .field("Post Count", post.author.post_count.to_string(), false)
        .field("Warning Count", post.author.warning_count.to_string(), false)
        .field("Forum Name", shown(&post.forum_name), false)
        .field("Topic Name", shown(&post.topic_name), false);

    if post.mode == QueueMode::Posts {
        let last_approved = match post.last_approved_post_date {
            Some(at) => format!("<t:{}>", at.timestamp()),
            None => LAST_APPROVED_MISSING.to_string(),
        };
        embed = embed.field("Last time post was approved in topic", last_approved, false);
    }

    embed = embed.field(
        "Post Content",
        shown(&truncate_chars(&post.post_text, BODY_LIMIT)),
        false,
    );
    embed.url = Some(approve_url.to_string());
    embed.timestamp = Some(post.post_time);
    embed.color = Some(CARD_COLOR);
    embed
}
