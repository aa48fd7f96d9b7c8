//! Administration control panel: re-authentication and username bans.

use super::login::footer_has_acp;
use crate::auth::FORM_SUBMIT_DELAY;
use crate::error::{BridgeError, BridgeResult};
use crate::html;
use crate::http::Session;
use scraper::Html;
use std::collections::BTreeMap;

const REAUTH_PROMPT: &str = "To administer the board you must re-authenticate yourself.";
const ACP_TITLE: &str = "Administration Control Panel";
const BAN_SUCCESS: &str = "Ban entered successfully.";

/// Result of trying to get into the ACP with the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminEntry {
    Entered,
    /// The base session is not good enough; log in again first.
    NeedsBaseLogin(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanAttempt {
    Banned,
    /// The user page rendered without the quick tools form, usually
    /// because the admin session lapsed.
    NoQuickTools,
    Rejected(String),
}

/// `sid` of the ACP link in the board footer.
fn footer_admin_sid(doc: &Html) -> Option<String> {
    let footer = html::first(doc, "#wrapfooter")?;
    footer
        .select(&html::sel("a[href]"))
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.contains("adm/index.php"))
        .and_then(|href| html::query_param(href, "sid"))
}

/// Hidden fields of the re-authentication form, if the page shows one.
fn reauth_fields(doc: &Html) -> Option<BTreeMap<String, String>> {
    doc.select(&html::sel("form")).find_map(|form| {
        let prompt = html::first_in(form, "th").map(html::text_of)?;
        (prompt == REAUTH_PROMPT).then(|| html::form_fields(form))
    })
}

fn reauth_form(
    fields: &BTreeMap<String, String>,
    password: &str,
) -> BridgeResult<Vec<(String, String)>> {
    let field = |name: &str| {
        fields.get(name).cloned().ok_or_else(|| {
            BridgeError::AdminAuth(format!("re-authentication form has no {name} field"))
        })
    };
    let credential = field("credential")?;

    Ok(vec![
        ("username".into(), field("username")?),
        (format!("password_{credential}"), password.to_string()),
        ("redirect".into(), field("redirect")?),
        ("creation_time".into(), field("creation_time")?),
        ("form_token".into(), field("form_token")?),
        ("sid".into(), field("sid")?),
        ("credential".into(), credential),
        ("login".into(), "Login".into()),
    ])
}

fn acp_title(doc: &Html) -> Option<String> {
    html::first_text(doc, "h1")
}

fn form_error(doc: &Html) -> Option<String> {
    html::first(doc, "form")
        .and_then(|form| html::first_in(form, ".error"))
        .map(html::text_of)
        .filter(|text| !text.is_empty())
}

/// Walk from the board index into the ACP, re-authenticating if asked.
pub async fn enter_admin(session: &Session, password: &str) -> BridgeResult<AdminEntry> {
    let page = session.get("/index.php").await?;
    let Some(sid) = ({
        let doc = page.html();
        footer_has_acp(&doc).then(|| footer_admin_sid(&doc)).flatten()
    }) else {
        return Ok(AdminEntry::NeedsBaseLogin(
            "board footer has no administration link".to_string(),
        ));
    };

    let page = session.get(&format!("/adm/index.php?sid={sid}")).await?;
    let (fields, title) = {
        let doc = page.html();
        (reauth_fields(&doc), acp_title(&doc))
    };

    let Some(fields) = fields else {
        return Ok(match title {
            Some(title) if title == ACP_TITLE => AdminEntry::Entered,
            _ => AdminEntry::NeedsBaseLogin("administration panel did not load".to_string()),
        });
    };

    let form = reauth_form(&fields, password)?;
    let form_sid = fields.get("sid").cloned().unwrap_or(sid);

    tokio::time::sleep(FORM_SUBMIT_DELAY).await;

    let page = session
        .post_form(&format!("/adm/index.php?sid={form_sid}"), &form)
        .await?;
    let doc = page.html();
    match acp_title(&doc) {
        None => Ok(AdminEntry::NeedsBaseLogin(
            "re-authentication returned no heading".to_string(),
        )),
        Some(title) if title == ACP_TITLE => Ok(AdminEntry::Entered),
        Some(_) => Err(BridgeError::AdminAuth(
            form_error(&doc).unwrap_or_else(|| "Unable to get error message".to_string()),
        )),
    }
}

fn quick_tools_fields(doc: &Html) -> Option<BTreeMap<String, String>> {
    html::first(doc, "form#user_quick_tools").map(html::form_fields)
}

fn ban_form(
    fields: &BTreeMap<String, String>,
    reviewer_name: &str,
    public_reason: &str,
) -> Option<Vec<(String, String)>> {
    Some(vec![
        ("action".into(), "banuser".into()),
        (
            "ban_reason".into(),
            format!("Username banned via Discord Bot ({reviewer_name})"),
        ),
        ("ban_give_reason".into(), public_reason.to_string()),
        ("update".into(), "Submit".into()),
        ("creation_time".into(), fields.get("creation_time")?.clone()),
        ("form_token".into(), fields.get("form_token")?.clone()),
    ])
}

fn ban_result(doc: &Html) -> Option<String> {
    doc.select(&html::sel("div.main p"))
        .map(html::text_of)
        .find(|text| !text.is_empty())
}

/// One attempt at banning a username from the user overview's quick tools.
pub async fn ban_once(
    session: &Session,
    user_id: u64,
    reviewer_name: &str,
    public_reason: &str,
) -> BridgeResult<BanAttempt> {
    let sid = session
        .cookie_by_affix("phpbb3_", "_sid")
        .ok_or_else(|| BridgeError::AdminAuth("no forum session id cookie".to_string()))?;

    let page = session
        .get(&format!("/adm/index.php?i=users&u={user_id}&sid={sid}"))
        .await?;
    let form = quick_tools_fields(&page.html())
        .and_then(|fields| ban_form(&fields, reviewer_name, public_reason));
    let Some(form) = form else {
        return Ok(BanAttempt::NoQuickTools);
    };

    tokio::time::sleep(FORM_SUBMIT_DELAY).await;

    let page = session
        .post_form(
            &format!("/adm/index.php?i=acp_users&sid={sid}&mode=overview&u={user_id}"),
            &form,
        )
        .await?;
    let result = ban_result(&page.html());
    match result {
        Some(text) if text.contains(BAN_SUCCESS) => Ok(BanAttempt::Banned),
        Some(text) => Ok(BanAttempt::Rejected(text)),
        None => Ok(BanAttempt::Rejected(format!(
            "ban of user {user_id} returned no status message"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REAUTH: &str = r#"
<form action="./index.php?sid=new1" method="post" id="login">
  <table><tr><th colspan="2">To administer the board you must re-authenticate yourself.</th></tr>
  <tr><td><input type="text" name="username" value="ModBot"></td></tr>
  <tr><td><input type="password" name="password_9f8e7d" value=""></td></tr></table>
  <input type="hidden" name="redirect" value="./index.php?sid=new1">
  <input type="hidden" name="creation_time" value="1700000000">
  <input type="hidden" name="form_token" value="ftok">
  <input type="hidden" name="sid" value="new1">
  <input type="hidden" name="credential" value="9f8e7d">
  <input type="submit" name="login" value="Login">
</form>"#;

    #[test]
    fn test_footer_admin_sid() {
        let doc = Html::parse_document(
            r#"<div id="wrapfooter">
                 <a href="./adm/index.php?sid=abc123">[ Administration Control Panel ]</a>
               </div>"#,
        );
        assert_eq!(footer_admin_sid(&doc).as_deref(), Some("abc123"));
        assert!(footer_admin_sid(&Html::parse_document("<div id='wrapfooter'></div>")).is_none());
    }

    #[test]
    fn test_reauth_form_uses_credential_suffix() {
        let fields = reauth_fields(&Html::parse_document(REAUTH)).unwrap();
        let form = reauth_form(&fields, "secret").unwrap();
        assert!(form.contains(&("password_9f8e7d".to_string(), "secret".to_string())));
        assert!(form.contains(&("username".to_string(), "ModBot".to_string())));
        assert!(form.contains(&("sid".to_string(), "new1".to_string())));
    }

    #[test]
    fn test_no_reauth_form_on_panel() {
        let doc = Html::parse_document("<h1>Administration Control Panel</h1><form><th>Search</th></form>");
        assert!(reauth_fields(&doc).is_none());
        assert_eq!(acp_title(&doc).as_deref(), Some(ACP_TITLE));
    }

    #[test]
    fn test_ban_form_requires_tokens() {
        let doc = Html::parse_document(
            r#"<form id="user_quick_tools" method="post">
                 <select name="action"><option value="banuser">Ban by username</option></select>
                 <input type="hidden" name="creation_time" value="1700000001">
                 <input type="hidden" name="form_token" value="qt">
               </form>"#,
        );
        let fields = quick_tools_fields(&doc).unwrap();
        let form = ban_form(&fields, "alice", "Spam").unwrap();
        assert!(form.contains(&(
            "ban_reason".to_string(),
            "Username banned via Discord Bot (alice)".to_string()
        )));
        assert!(form.contains(&("ban_give_reason".to_string(), "Spam".to_string())));

        assert!(ban_form(&BTreeMap::new(), "alice", "Spam").is_none());
        assert!(quick_tools_fields(&Html::parse_document("<form id='other'></form>")).is_none());
    }

    #[test]
    fn test_ban_result_text() {
        let doc = Html::parse_document(
            r##"<div class="main"><h1>Information</h1><p>Ban entered successfully.<br><br><a href="#">Back</a></p></div>"##,
        );
        assert!(ban_result(&doc).unwrap().contains(BAN_SUCCESS));
    }
}
