//! Verify the configured credentials against one platform.

use anyhow::{bail, Context, Result};
use modbridge::auth::SessionStore;
use modbridge::config::Config;
use modbridge::forum::ForumClient;
use modbridge::geo::NoIpLookup;
use modbridge::http::HttpClient;
use modbridge::platform::Platform;
use modbridge::wiki::WikiClient;
use std::sync::Arc;

pub async fn run(platform: Platform, fresh: bool, admin: bool) -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    let http = HttpClient::new(config.http_timeout_ms);
    let store = Arc::new(SessionStore::new(config.sessions_dir()));

    match platform {
        Platform::Wiki => {
            if admin {
                bail!("--admin only applies to the forum");
            }
            let client = WikiClient::new(&config.wiki, http, store);
            client.authenticator().session(fresh).await?;
        }
        Platform::Forum => {
            let Some(credentials) = &config.forum else {
                bail!("PHPBB_BASE_URL is not set");
            };
            let client = ForumClient::new(credentials, http, store, Arc::new(NoIpLookup));
            if admin {
                client.admin_session(fresh).await?;
            } else {
                client.authenticator().session(fresh).await?;
            }
        }
    }

    println!(
        "  [OK] {platform} session is valid{}",
        if admin { " (administration panel entered)" } else { "" }
    );
    Ok(())
}
