//! Runtime configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is read first when present.
//! Required entries fail with a [`ConfigError::Missing`] that says how to
//! fix them; tuning knobs fall back to defaults.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_WIKI_POLL_SECS: u64 = 10;
const DEFAULT_FORUM_POLL_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;
const MIN_POLL_SECS: u64 = 1;
const DATA_DIR_ENTRY: &str = "MODBRIDGE_DATA_DIR";

pub const LEDGER_FILE: &str = "ledger.db";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

/// Chat channels the bridge posts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub debug: u64,
    pub wiki_requests: u64,
    pub wiki_logs: u64,
    pub forum: Option<ForumChannels>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForumChannels {
    pub topics: u64,
    pub posts: u64,
    pub logs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub channels: Channels,
    /// Role whose members may resolve cards.
    pub moderator_role: String,
    pub wiki: Credentials,
    /// Absent when `PHPBB_BASE_URL` is unset.
    pub forum: Option<Credentials>,
    pub data_dir: PathBuf,
    pub wiki_poll_every: Duration,
    pub forum_poll_every: Duration,
    pub http_timeout_ms: u64,
    pub ipinfo_token: Option<String>,
}

impl Config {
    /// Load from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let discord_token = env.required(
            "DISCORD_BOT_TOKEN",
            "Create a bot in the Discord developer portal and copy its token",
        )?;
        let debug = env.required_id(
            "DISCORD_BOT_DEBUG_CHANNEL",
            "Channel id where the bot reports failures",
        )?;
        let wiki_requests = env.required_id(
            "DISCORD_WIKI_ACCOUNT_REQUESTS_REACTION_CHANNEL_ID",
            "Channel id where wiki account requests are reviewed",
        )?;
        let wiki_logs = env.required_id(
            "DISCORD_WIKI_LOGS_CHANNEL_ID",
            "Channel id for wiki moderation logs and automod notices",
        )?;
        let moderator_role = env.required(
            "ROLE_NAME",
            "The name of the role that can moderate wiki accounts and forum posts",
        )?;
        let wiki = Credentials {
            base_url: trim_base_url(&env.required(
                "WIKI_BASE_URL",
                "Root URL of the wiki, e.g. https://wiki.example.net",
            )?),
            username: env.required("WIKI_USERNAME", "Wiki account with ConfirmAccount rights")?,
            password: env.required("WIKI_PASSWORD", "Password of WIKI_USERNAME")?,
        };

        let (forum, forum_channels) = match env.optional("PHPBB_BASE_URL") {
            Some(base_url) => {
                let credentials = Credentials {
                    base_url: trim_base_url(&base_url),
                    username: env.required("PHPBB_USERNAME", "Forum moderator account")?,
                    password: env.required("PHPBB_PASSWORD", "Password of PHPBB_USERNAME")?,
                };
                let channels = ForumChannels {
                    topics: env.required_id(
                        "DISCORD_FORUM_TOPIC_REQUESTS_REACTION_CHANNEL_ID",
                        "Channel id where unapproved forum topics are reviewed",
                    )?,
                    posts: env.required_id(
                        "DISCORD_FORUM_POST_REQUESTS_REACTION_CHANNEL_ID",
                        "Channel id where unapproved forum posts are reviewed",
                    )?,
                    logs: env.required_id(
                        "DISCORD_FORUM_LOGS_CHANNEL_ID",
                        "Channel id for forum moderation logs",
                    )?,
                };
                (Some(credentials), Some(channels))
            }
            None => (None, None),
        };

        let data_dir = env
            .optional(DATA_DIR_ENTRY)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            discord_token,
            channels: Channels {
                debug,
                wiki_requests,
                wiki_logs,
                forum: forum_channels,
            },
            moderator_role,
            wiki,
            forum,
            data_dir,
            wiki_poll_every: Duration::from_secs(
                env.u64("MODBRIDGE_WIKI_POLL_SECS", DEFAULT_WIKI_POLL_SECS)?
                    .max(MIN_POLL_SECS),
            ),
            forum_poll_every: Duration::from_secs(
                env.u64("MODBRIDGE_FORUM_POLL_SECS", DEFAULT_FORUM_POLL_SECS)?
                    .max(MIN_POLL_SECS),
            ),
            http_timeout_ms: env.u64("MODBRIDGE_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS)?,
            ipinfo_token: env.optional("IPINFO_TOKEN"),
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn ip_cache_path(&self) -> PathBuf {
        self.data_dir.join("ipinfo_cache.json")
    }
}

/// The data directory alone, for commands that only touch local state.
pub fn data_dir_from_env() -> PathBuf {
    let _ = dotenvy::dotenv();
    std::env::var(DATA_DIR_ENTRY)
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_data_dir)
}

/// Default data directory: `~/.modbridge`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".modbridge")
}

fn trim_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str, hint: &str) -> Result<String, ConfigError> {
        self.optional(name).ok_or_else(|| ConfigError::Missing {
            entry: name.to_string(),
            hint: hint.to_string(),
        })
    }

    fn required_id(&self, name: &str, hint: &str) -> Result<u64, ConfigError> {
        let raw = self.required(name, hint)?;
        raw.parse::<u64>().map_err(|_| ConfigError::Invalid {
            entry: name.to_string(),
            reason: format!("'{raw}' is not a numeric id"),
        })
    }

    fn u64(&self, name: &str, default: u64) -> Result<u64, ConfigError> {
        match self.optional(name) {
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::Invalid {
                entry: name.to_string(),
                reason: format!("'{raw}' is not a whole number"),
            }),
            None => Ok(default),
        }
    }
}
