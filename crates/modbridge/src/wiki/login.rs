//! `Special:UserLogin` handshake.

use crate::auth::LoginFlow;
use crate::error::{BridgeError, BridgeResult};
use crate::html;
use crate::http::Session;
use crate::platform::Platform;
use async_trait::async_trait;
use scraper::Html;
use std::collections::BTreeMap;

const LOGIN_FORM_PATH: &str = "/index.php?title=Special:UserLogin";
const LOGIN_POST_PATH: &str = "/Special:UserLogin";

pub struct WikiLogin {
    username: String,
    password: String,
}

impl WikiLogin {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn login_form(&self, hidden: &BTreeMap<String, String>) -> BridgeResult<Vec<(String, String)>> {
        let token = |name: &str| {
            hidden.get(name).cloned().ok_or_else(|| {
                BridgeError::Layout(format!("wiki login form has no {name} field"))
            })
        };

        Ok(vec![
            ("title".into(), "Special:UserLogin".into()),
            ("wpName".into(), self.username.clone()),
            ("wpPassword".into(), self.password.clone()),
            ("wpRemember".into(), "1".into()),
            ("wploginattempt".into(), "Log in".into()),
            ("wpEditToken".into(), token("wpEditToken")?),
            ("authAction".into(), token("authAction")?),
            ("force".into(), String::new()),
            ("wpLoginToken".into(), token("wpLoginToken")?),
        ])
    }
}

/// True when the page shows the logged-in user menu.
pub fn is_logged_in(doc: &Html) -> bool {
    html::has(doc, "#pt-logout")
}

/// Error text MediaWiki renders above a rejected form.
pub fn page_error(doc: &Html) -> Option<String> {
    html::first_text(doc, "div.errorbox")
        .or_else(|| html::first_text(doc, "div.mw-message-box-error"))
        .filter(|text| !text.is_empty())
}

#[async_trait]
impl LoginFlow for WikiLogin {
    fn platform(&self) -> Platform {
        Platform::Wiki
    }

    async fn validate(&self, session: &Session) -> BridgeResult<bool> {
        let page = session.get("/").await?;
        Ok(page.is_success() && is_logged_in(&page.html()))
    }

    async fn login(&self, session: &Session) -> BridgeResult<()> {
        let page = session.get(LOGIN_FORM_PATH).await?;
        if !page.is_success() {
            return Err(BridgeError::auth(
                Platform::Wiki,
                format!("login page returned HTTP {}", page.status),
            ));
        }

        let hidden = {
            let doc = page.html();
            let form = doc
                .select(&html::sel("form[name=\"userlogin\"]"))
                .next()
                .ok_or_else(|| BridgeError::auth(Platform::Wiki, "Unable to find login form!"))?;
            html::form_fields(form)
        };
        let form = self.login_form(&hidden)?;

        let page = session.post_form(LOGIN_POST_PATH, &form).await?;
        let doc = page.html();
        if is_logged_in(&doc) {
            return Ok(());
        }

        let message = page_error(&doc)
            .unwrap_or_else(|| "login did not reach a logged-in page".to_string());
        Err(BridgeError::auth(Platform::Wiki, message))
    }
}
