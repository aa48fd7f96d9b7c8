//! `ucp.php?mode=login` handshake.

use crate::auth::{LoginFlow, FORM_SUBMIT_DELAY};
use crate::error::{BridgeError, BridgeResult};
use crate::html;
use crate::http::Session;
use crate::platform::Platform;
use async_trait::async_trait;
use scraper::Html;
use std::collections::BTreeMap;

const LOGIN_PATH: &str = "/ucp.php?mode=login&redirect=index.php";
const LOGIN_POST_PATH: &str = "/ucp.php?mode=login";
const ACP_MARKER: &str = "[ Administration Control Panel ]";
/// Heading shown when a moderator page is opened without a session.
pub const LOGIN_PROMPT: &str = "To moderate this forum you must login.";

pub struct ForumLogin {
    username: String,
    password: String,
}

impl ForumLogin {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    fn login_form(&self, hidden: &BTreeMap<String, String>) -> BridgeResult<Vec<(String, String)>> {
        let field = |name: &str| {
            hidden.get(name).cloned().ok_or_else(|| {
                BridgeError::auth(Platform::Forum, format!("login form has no {name} field"))
            })
        };

        Ok(vec![
            ("username".into(), self.username.clone()),
            ("password".into(), self.password.clone()),
            ("autologin".into(), "on".into()),
            (
                "redirect".into(),
                "./ucp.php?mode=login&redirect=index.php".into(),
            ),
            ("creation_time".into(), field("creation_time")?),
            ("form_token".into(), field("form_token")?),
            ("sid".into(), field("sid")?),
            ("login".into(), "Login".into()),
        ])
    }
}

/// True when the footer links to the administration panel, which is only
/// rendered for a logged-in administrator.
pub fn footer_has_acp(doc: &Html) -> bool {
    html::first(doc, "#wrapfooter")
        .map(|footer| html::text_of(footer).contains(ACP_MARKER))
        .unwrap_or(false)
}

/// True when phpBB bounced a moderator page to its login prompt.
pub fn is_login_prompt(doc: &Html) -> bool {
    doc.select(&html::sel("h2"))
        .any(|h2| html::text_of(h2) == LOGIN_PROMPT)
}

/// Error text from a failed login: the `.error` element of the second form.
pub fn login_error(doc: &Html) -> Option<String> {
    let form = doc.select(&html::sel("form")).nth(1)?;
    html::first_in(form, ".error")
        .map(html::text_of)
        .filter(|text| !text.is_empty())
}

fn find_login_fields(doc: &Html) -> Option<BTreeMap<String, String>> {
    doc.select(&html::sel("form"))
        .find(|form| {
            form.value()
                .attr("action")
                .map(|action| action.starts_with("./ucp.php?mode=login"))
                .unwrap_or(false)
        })
        .map(html::form_fields)
}

#[async_trait]
impl LoginFlow for ForumLogin {
    fn platform(&self) -> Platform {
        Platform::Forum
    }

    async fn validate(&self, session: &Session) -> BridgeResult<bool> {
        let page = session.get("/").await?;
        Ok(page.is_success() && footer_has_acp(&page.html()))
    }

    async fn login(&self, session: &Session) -> BridgeResult<()> {
        // The first visit only seeds the session cookie; the form tokens
        // are bound to the second.
        session.get(LOGIN_PATH).await?;
        let page = session.get(LOGIN_PATH).await?;
        if !page.is_success() {
            return Err(BridgeError::auth(
                Platform::Forum,
                format!("login page returned HTTP {}", page.status),
            ));
        }

        let hidden = find_login_fields(&page.html())
            .ok_or_else(|| BridgeError::auth(Platform::Forum, "Unable to find login form!"))?;
        let form = self.login_form(&hidden)?;

        tokio::time::sleep(FORM_SUBMIT_DELAY).await;

        let page = session.post_form(LOGIN_POST_PATH, &form).await?;
        let doc = page.html();
        if footer_has_acp(&doc) {
            return Ok(());
        }

        let message = login_error(&doc).unwrap_or_else(|| "Unable to get error message".to_string());
        Err(BridgeError::auth(Platform::Forum, message))
    }
}
