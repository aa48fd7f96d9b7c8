//! Replay an approve/deny decision onto `Special:ConfirmAccounts`.
//!
//! Accepting a request may land on a pre-filled account creation form,
//! which is then submitted as a second step.

use super::login::page_error;
use super::WikiAccountRequest;
use crate::error::{BridgeError, BridgeResult};
use crate::html;
use crate::http::Session;
use crate::platform::Platform;
use scraper::Html;

/// MediaWiki's message when a form token no longer matches the session.
pub const INVALID_SESSION_TEXT: &str = "There seems to be a problem with your login session";

const MODERATE_PATH: &str = "/Special:ConfirmAccounts/authors";
const CREATE_ACCOUNT_PATH: &str =
    "/index.php?title=Special:CreateAccount&returnto=Special:ConfirmAccounts/authors";

/// Data needed to submit the account creation step.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CreateAccountForm {
    email: String,
    edit_token: String,
    create_token: String,
}

/// One attempt. [`BridgeError::SessionInvalid`] tells the caller a fresh
/// login may succeed.
pub async fn moderate_once(
    session: &Session,
    request: &WikiAccountRequest,
    approved: bool,
) -> BridgeResult<()> {
    tracing::debug!("moderating wiki request {} approved={approved}", request.acrid);

    let review_path = format!(
        "/index.php?title=Special:ConfirmAccounts/authors&acrid={}",
        request.acrid
    );
    let page = session.get(&review_path).await?;
    let edit_token = {
        let doc = page.html();
        doc.select(&html::sel("form"))
            .find_map(|form| html::input_value(form, "wpEditToken"))
    };
    let Some(edit_token) = edit_token else {
        return Err(BridgeError::SessionInvalid(Platform::Wiki));
    };

    let submit_type = if approved { "accept" } else { "spam" };
    let form = vec![
        ("wpNewName".to_string(), request.username.clone()),
        ("wpNewBio".to_string(), request.biography.clone()),
        ("wpNotes".to_string(), String::new()),
        ("wpSubmitType".to_string(), submit_type.to_string()),
        ("wpReason".to_string(), String::new()),
        ("title".to_string(), "Special:ConfirmAccounts/authors".to_string()),
        ("action".to_string(), "reject".to_string()),
        ("acrid".to_string(), request.acrid.to_string()),
        ("wpShowRejects".to_string(), String::new()),
        ("wpEditToken".to_string(), edit_token),
    ];
    let page = session.post_form(MODERATE_PATH, &form).await?;

    let create = {
        let doc = page.html();
        check_page(&doc)?;
        if approved {
            create_account_form(&doc, &request.email)
        } else {
            None
        }
    };

    if !page.is_success() {
        return Err(BridgeError::Upstream(format!(
            "wiki moderation returned HTTP {}",
            page.status
        )));
    }

    match create {
        Some(create) => create_account(session, request, create).await,
        None => Ok(()),
    }
}

async fn create_account(
    session: &Session,
    request: &WikiAccountRequest,
    create: CreateAccountForm,
) -> BridgeResult<()> {
    let form = vec![
        ("title".to_string(), "Special:CreateAccount".to_string()),
        ("wpName".to_string(), request.username.clone()),
        ("wpCreateaccountMail".to_string(), "1".to_string()),
        ("email".to_string(), create.email),
        ("realname".to_string(), request.name.clone()),
        ("reason".to_string(), String::new()),
        ("wpCreateaccount".to_string(), "Create account".to_string()),
        ("wpEditToken".to_string(), create.edit_token),
        ("authAction".to_string(), "create".to_string()),
        ("force".to_string(), String::new()),
        ("wpCreateaccountToken".to_string(), create.create_token),
        ("AccountRequestId".to_string(), request.acrid.to_string()),
    ];
    let page = session.post_form(CREATE_ACCOUNT_PATH, &form).await?;
    check_page(&page.html())?;

    if !page.is_success() {
        return Err(BridgeError::Upstream(format!(
            "wiki account creation returned HTTP {}",
            page.status
        )));
    }
    tracing::debug!("created wiki account for request {}", request.acrid);
    Ok(())
}

/// Map an error box on a response page onto the error taxonomy.
fn check_page(doc: &Html) -> BridgeResult<()> {
    match page_error(doc) {
        Some(text) if text.contains(INVALID_SESSION_TEXT) => {
            Err(BridgeError::SessionInvalid(Platform::Wiki))
        }
        Some(text) => Err(BridgeError::Upstream(text)),
        None => Ok(()),
    }
}

/// The creation step applies only when the confirmation page echoes the
/// requester's e-mail address.
fn create_account_form(doc: &Html, requested_email: &str) -> Option<CreateAccountForm> {
    let email = html::first(doc, "input#wpEmail")?
        .value()
        .attr("value")?
        .to_string();
    if email != requested_email.trim_end_matches(" (confirmed)") {
        return None;
    }

    let edit_token = html::first(doc, "input#wpEditToken")
        .and_then(|i| i.value().attr("value"))
        .map(str::to_string)
        .or_else(|| {
            doc.select(&html::sel("input[name=\"wpEditToken\"]"))
                .find_map(|i| i.value().attr("value").map(str::to_string))
        })?;
    let create_token = doc
        .select(&html::sel("input[name=\"wpCreateaccountToken\"]"))
        .find_map(|i| i.value().attr("value").map(str::to_string))
        .unwrap_or_default();

    Some(CreateAccountForm {
        email,
        edit_token,
        create_token,
    })
}
