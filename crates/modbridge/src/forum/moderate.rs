//! Approve/disapprove replay through the moderator control panel.
//!
//! phpBB asks for confirmation on every queue action: the first POST
//! returns a confirm form whose action carries a `confirm_key`, and the
//! second POST repeats the action with that key.

use super::extract::approve_details_path;
use super::login::is_login_prompt;
use super::ForumDecision;
use crate::error::{BridgeError, BridgeResult};
use crate::html;
use crate::platform::Platform;
use crate::http::Session;
use scraper::Html;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfirmForm {
    confirm_key: String,
    mode: String,
    confirm_uid: String,
    sess: String,
    sid: String,
}

fn parse_confirm_form(doc: &Html) -> BridgeResult<ConfirmForm> {
    let Some(form) = html::first(doc, "form") else {
        if is_login_prompt(doc) {
            return Err(BridgeError::SessionInvalid(Platform::Forum));
        }
        return Err(BridgeError::Upstream(
            "moderation confirmation form not found".to_string(),
        ));
    };

    let confirm_key = form
        .value()
        .attr("action")
        .and_then(|action| html::query_param(action, "confirm_key"))
        .ok_or_else(|| BridgeError::Upstream("confirmation form has no confirm_key".into()))?;

    let fields = html::form_fields(form);
    let field = |name: &str| {
        fields.get(name).cloned().ok_or_else(|| {
            BridgeError::Upstream(format!("confirmation form has no {name} field"))
        })
    };

    Ok(ConfirmForm {
        confirm_key,
        mode: field("mode")?,
        confirm_uid: field("confirm_uid")?,
        sess: field("sess")?,
        sid: field("sid")?,
    })
}

fn confirm_fields(post_id: u64, decision: &ForumDecision, form: ConfirmForm) -> Vec<(String, String)> {
    let mut fields = vec![("notify_poster".to_string(), "on".to_string())];
    let action = match decision {
        ForumDecision::Approve => "approve",
        ForumDecision::Deny { reason, message } => {
            fields.push(("reason_id".to_string(), reason.code().to_string()));
            fields.push(("reason".to_string(), message.clone()));
            "disapprove"
        }
    };
    let redirect = match decision {
        ForumDecision::Approve => format!("./mcp.php?i=queue&p={post_id}"),
        ForumDecision::Deny { .. } => format!("./mcp.php?i=queue&p={post_id}&mode={}", form.mode),
    };

    fields.extend([
        ("i".to_string(), "queue".to_string()),
        ("mode".to_string(), form.mode),
        ("post_id_list[0]".to_string(), post_id.to_string()),
        ("action".to_string(), action.to_string()),
        ("redirect".to_string(), redirect),
        ("confirm_uid".to_string(), form.confirm_uid),
        ("sess".to_string(), form.sess),
        ("sid".to_string(), form.sid),
        ("confirm".to_string(), "Yes".to_string()),
    ]);
    fields
}

/// Status line phpBB shows after a queue action.
fn result_message(doc: &Html) -> Option<String> {
    doc.select(&html::sel("p.gen"))
        .find(|p| p.value().attr("style") == Some("line-height:120%"))
        .map(html::text_of)
}

/// One attempt at applying `decision` to a queued post.
pub async fn moderate_once(
    session: &Session,
    post_id: u64,
    decision: &ForumDecision,
) -> BridgeResult<()> {
    let page = session.get(&approve_details_path(post_id)).await?;
    if is_login_prompt(&page.html()) {
        return Err(BridgeError::SessionInvalid(Platform::Forum));
    }

    let action = if decision.is_approve() {
        ("action[approve]".to_string(), "Approve".to_string())
    } else {
        ("action[disapprove]".to_string(), "Disapprove".to_string())
    };
    let form = vec![("post_id_list[]".to_string(), post_id.to_string()), action];
    let page = session
        .post_form(&format!("/mcp.php?i=queue&p={post_id}"), &form)
        .await?;
    if !page.is_success() {
        return Err(BridgeError::Upstream(format!(
            "queue action for post {post_id} returned HTTP {}",
            page.status
        )));
    }

    let confirm = parse_confirm_form(&page.html())?;
    let path = format!(
        "/mcp.php?i=queue&p={post_id}&confirm_key={}",
        confirm.confirm_key
    );
    let fields = confirm_fields(post_id, decision, confirm);

    let page = session.post_form(&path, &fields).await?;
    if !page.is_success() {
        return Err(BridgeError::Upstream(format!(
            "confirmation for post {post_id} returned HTTP {}",
            page.status
        )));
    }

    let message = result_message(&page.html());
    tracing::debug!(
        "forum post {post_id} moderated: {}",
        message.as_deref().unwrap_or("no status message")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forum::RejectionReason;

    const CONFIRM: &str = r#"
<form method="post" action="./mcp.php?i=queue&amp;p=1234&amp;confirm_key=KEY99">
  <input type="hidden" name="i" value="queue">
  <input type="hidden" name="mode" value="unapproved_posts">
  <input type="hidden" name="post_id_list[0]" value="1234">
  <input type="hidden" name="confirm_uid" value="2">
  <input type="hidden" name="sess" value="sess1">
  <input type="hidden" name="sid" value="sid1">
  <select name="reason_id"><option value="1">Warez</option></select>
  <input type="submit" name="confirm" value="Yes">
</form>"#;

    #[test]
    fn test_parse_confirm_form() {
        let form = parse_confirm_form(&Html::parse_document(CONFIRM)).unwrap();
        assert_eq!(form.confirm_key, "KEY99");
        assert_eq!(form.mode, "unapproved_posts");
        assert_eq!(form.sid, "sid1");
    }

    #[test]
    fn test_confirm_form_missing_is_classified() {
        let prompt = Html::parse_document("<h2>To moderate this forum you must login.</h2>");
        assert!(matches!(
            parse_confirm_form(&prompt),
            Err(BridgeError::SessionInvalid(Platform::Forum))
        ));
        let other = Html::parse_document("<p>The selected post was already approved.</p>");
        assert!(matches!(parse_confirm_form(&other), Err(BridgeError::Upstream(_))));
    }

    #[test]
    fn test_deny_fields_carry_reason() {
        let form = parse_confirm_form(&Html::parse_document(CONFIRM)).unwrap();
        let decision = ForumDecision::Deny {
            reason: RejectionReason::Advertising,
            message: "No ads please".into(),
        };
        let fields = confirm_fields(1234, &decision, form);
        let get = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("action"), Some("disapprove"));
        assert_eq!(get("reason_id"), Some("2"));
        assert_eq!(get("reason"), Some("No ads please"));
        assert_eq!(get("post_id_list[0]"), Some("1234"));
        assert_eq!(get("confirm"), Some("Yes"));
    }

    #[test]
    fn test_approve_fields_have_no_reason() {
        let form = parse_confirm_form(&Html::parse_document(CONFIRM)).unwrap();
        let fields = confirm_fields(1234, &ForumDecision::Approve, form);
        assert!(fields.iter().all(|(k, _)| k != "reason_id"));
        assert!(fields.contains(&("action".to_string(), "approve".to_string())));
    }

    #[test]
    fn test_result_message() {
        let doc = Html::parse_document(
            r#"<p class="gen" style="line-height:120%">The selected post has been approved successfully.<br><br>Return</p>"#,
        );
        assert!(result_message(&doc)
            .unwrap()
            .starts_with("The selected post has been approved successfully."));
    }
}
