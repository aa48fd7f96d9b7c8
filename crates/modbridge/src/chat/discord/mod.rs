//! Discord adapter: REST v10 for messages, channels, and roles, plus the
//! gateway connection that delivers button, select, and modal events.

pub mod gateway;

use super::{
    ChatMessage, ChatResult, ChatSurface, ChatUser, Embed, EmbedField, ModerationView,
    OutgoingMessage, PostedMessage,
};
use crate::error::ChatError;
use crate::forum::RejectionReason;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;

pub use gateway::Gateway;

pub const API_BASE: &str = "https://discord.com/api/v10";
const PAGE_LIMIT: usize = 100;
const MAX_RATE_LIMIT_RETRIES: usize = 3;

/// Component ids carried on cards and modals.
pub mod ids {
    pub const ACCOUNT_APPROVE: &str = "row_0_button_0_approve";
    pub const ACCOUNT_DENY: &str = "row_0_button_1_deny";
    pub const REASON_DROPDOWN: &str = "post_rejection_reason_dropdown";
    pub const FORUM_APPROVE: &str = "phpbb_row_0_approve";
    pub const FORUM_DENY: &str = "phpbb_row_0_deny";
    pub const FORUM_DENY_AND_BAN: &str = "phpbb_row_0_deny_and_ban";
    pub const DENY_MODAL: &str = "phpbb_deny_reason_modal";
    pub const BAN_MODAL: &str = "phpbb_ban_modal";
    pub const REASON_INPUT: &str = "reason";
    pub const CONFIRM_INPUT: &str = "confirm_text";
    pub const PUBLIC_REASON_INPUT: &str = "public_ban_reason";
}

// ── Wire types ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireField {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    inline: bool,
}

#[derive(Debug, Default, Deserialize)]
struct WireEmbed {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    color: Option<u32>,
    #[serde(default)]
    fields: Vec<WireField>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    channel_id: String,
    author: WireUser,
    #[serde(default)]
    content: String,
    #[serde(default)]
    embeds: Vec<WireEmbed>,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    #[serde(default)]
    guild_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRole {
    id: String,
    name: String,
}

pub(crate) fn snowflake(raw: &str) -> ChatResult<u64> {
    raw.parse()
        .map_err(|_| ChatError::Request(format!("invalid snowflake {raw:?}")))
}

impl From<WireEmbed> for Embed {
    fn from(wire: WireEmbed) -> Self {
        Embed {
            title: wire.title.unwrap_or_default(),
            description: wire.description.unwrap_or_default(),
            url: wire.url,
            timestamp: wire
                .timestamp
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc)),
            color: wire.color,
            fields: wire
                .fields
                .into_iter()
                .map(|f| EmbedField {
                    name: f.name,
                    value: f.value,
                    inline: f.inline,
                })
                .collect(),
        }
    }
}

impl TryFrom<WireMessage> for ChatMessage {
    type Error = ChatError;

    fn try_from(wire: WireMessage) -> ChatResult<Self> {
        Ok(ChatMessage {
            id: snowflake(&wire.id)?,
            channel_id: snowflake(&wire.channel_id)?,
            author_id: snowflake(&wire.author.id)?,
            content: wire.content,
            embeds: wire.embeds.into_iter().map(Embed::from).collect(),
        })
    }
}

// ── Request bodies ─────────────────────────────────────────────

pub fn embed_json(embed: &Embed) -> Value {
    let mut body = json!({
        "title": embed.title,
        "description": embed.description,
        "type": "rich",
        "fields": embed.fields.iter().map(|f| json!({
            "name": f.name,
            "value": f.value,
            "inline": f.inline,
        })).collect::<Vec<_>>(),
    });
    if let Some(url) = &embed.url {
        body["url"] = json!(url);
    }
    if let Some(timestamp) = embed.timestamp {
        body["timestamp"] = json!(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    if let Some(color) = embed.color {
        body["color"] = json!(color);
    }
    body
}

fn button(custom_id: &str, label: &str, style: u8) -> Value {
    json!({ "type": 2, "style": style, "label": label, "custom_id": custom_id })
}

/// Action rows for a card's controls.
pub fn view_components(view: ModerationView) -> Value {
    match view {
        ModerationView::AccountApproval => json!([{
            "type": 1,
            "components": [
                button(ids::ACCOUNT_APPROVE, "Approve", 3),
                button(ids::ACCOUNT_DENY, "Deny", 4),
            ],
        }]),
        ModerationView::ForumModeration => {
            let options: Vec<Value> = RejectionReason::ALL
                .iter()
                .map(|r| json!({ "label": r.label(), "value": r.code().to_string() }))
                .collect();
            json!([
                {
                    "type": 1,
                    "components": [{
                        "type": 3,
                        "custom_id": ids::REASON_DROPDOWN,
                        "placeholder": "Select a disapprove reason",
                        "min_values": 1,
                        "max_values": 1,
                        "options": options,
                    }],
                },
                {
                    "type": 1,
                    "components": [
                        button(ids::FORUM_APPROVE, "Approve", 3),
                        button(ids::FORUM_DENY, "Deny", 2),
                        button(ids::FORUM_DENY_AND_BAN, "Deny & Ban", 4),
                    ],
                },
            ])
        }
    }
}

pub fn message_json(message: &OutgoingMessage) -> Value {
    let mut body = json!({});
    if let Some(content) = &message.content {
        body["content"] = json!(content);
    }
    if let Some(embed) = &message.embed {
        body["embeds"] = json!([embed_json(embed)]);
    }
    if let Some(view) = message.view {
        body["components"] = view_components(view);
    }
    body
}

// ── REST client ────────────────────────────────────────────────

/// Discord REST client implementing [`ChatSurface`].
pub struct DiscordRest {
    client: reqwest::Client,
    api_base: String,
    token: String,
    /// channel id -> guild id
    guilds: DashMap<u64, Option<u64>>,
    /// guild id -> role id -> role name
    roles: DashMap<u64, HashMap<u64, String>>,
    /// message id -> attached controls
    views: DashMap<u64, ModerationView>,
    bot: OnceCell<ChatUser>,
}

impl DiscordRest {
    pub fn new(token: &str) -> Self {
        Self::with_api_base(token, API_BASE)
    }

    pub fn with_api_base(token: &str, api_base: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "DiscordBot (https://github.com/modbridge/modbridge, {})",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            guilds: DashMap::new(),
            roles: DashMap::new(),
            views: DashMap::new(),
            bot: OnceCell::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Controls registered for a message, if it is a live card.
    pub fn view_for(&self, message_id: u64) -> Option<ModerationView> {
        self.views.get(&message_id).map(|v| *v)
    }

    /// Send a request, waiting out rate limits. Non-success statuses other
    /// than 429 are returned to the caller.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ChatResult<reqwest::Response> {
        let url = format!("{}{path}", self.api_base);
        for _ in 0..=MAX_RATE_LIMIT_RETRIES {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.token));
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ChatError::Unavailable(e.to_string()))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let wait = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(1.0);
            tracing::warn!("discord rate limited on {path}, waiting {wait:.2}s");
            tokio::time::sleep(Duration::from_secs_f64(wait.clamp(0.0, 60.0))).await;
        }

        Err(ChatError::Unavailable(format!(
            "still rate limited after {MAX_RATE_LIMIT_RETRIES} retries on {path}"
        )))
    }

    async fn call_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ChatResult<T> {
        let response = check(self.call(method, path, body).await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ChatError::Request(format!("unreadable response from {path}: {e}")))
    }

    async fn channel_guild(&self, channel_id: u64) -> ChatResult<Option<u64>> {
        if let Some(guild) = self.guilds.get(&channel_id) {
            return Ok(*guild);
        }
        let channel: WireChannel = self
            .call_json(Method::GET, &format!("/channels/{channel_id}"), None)
            .await?;
        let guild = channel.guild_id.as_deref().map(snowflake).transpose()?;
        self.guilds.insert(channel_id, guild);
        Ok(guild)
    }

    /// Names of the given role ids in a guild. The role list is refetched
    /// when an id is not cached.
    pub async fn role_names(&self, guild_id: u64, role_ids: &[u64]) -> ChatResult<Vec<String>> {
        let cached = self
            .roles
            .get(&guild_id)
            .map(|roles| role_ids.iter().all(|id| roles.contains_key(id)))
            .unwrap_or(false);

        if !cached {
            let wire: Vec<WireRole> = self
                .call_json(Method::GET, &format!("/guilds/{guild_id}/roles"), None)
                .await?;
            let mut roles = HashMap::new();
            for role in wire {
                roles.insert(snowflake(&role.id)?, role.name);
            }
            self.roles.insert(guild_id, roles);
        }

        Ok(self
            .roles
            .get(&guild_id)
            .map(|roles| {
                role_ids
                    .iter()
                    .filter_map(|id| roles.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Answer an interaction within Discord's three-second window.
    pub async fn interaction_callback(
        &self,
        interaction_id: &str,
        token: &str,
        body: &Value,
    ) -> ChatResult<()> {
        let path = format!("/interactions/{interaction_id}/{token}/callback");
        check(self.call(Method::POST, &path, Some(body)).await?).await?;
        Ok(())
    }

    /// Replace the application's global slash commands with `commands`.
    pub async fn register_commands(&self, application_id: u64, commands: &Value) -> ChatResult<()> {
        let path = format!("/applications/{application_id}/commands");
        check(self.call(Method::PUT, &path, Some(commands)).await?).await?;
        Ok(())
    }

    /// Replace the deferred reply of an interaction.
    pub async fn edit_original_response(
        &self,
        application_id: u64,
        token: &str,
        content: &str,
    ) -> ChatResult<()> {
        let path = format!("/webhooks/{application_id}/{token}/messages/@original");
        let body = json!({ "content": content });
        check(self.call(Method::PATCH, &path, Some(&body)).await?).await?;
        Ok(())
    }
}

/// Turn an error status into a [`ChatError`].
async fn check(response: reqwest::Response) -> ChatResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(ChatError::Unavailable(format!("discord returned {status}: {body}")))
    } else {
        Err(ChatError::Request(format!("discord returned {status}: {body}")))
    }
}

#[async_trait]
impl ChatSurface for DiscordRest {
    async fn history(&self, channel_id: u64) -> ChatResult<Vec<ChatMessage>> {
        let mut messages = Vec::new();
        let mut before: Option<u64> = None;

        loop {
            let mut path = format!("/channels/{channel_id}/messages?limit={PAGE_LIMIT}");
            if let Some(before) = before {
                path.push_str(&format!("&before={before}"));
            }
            let page: Vec<WireMessage> = self.call_json(Method::GET, &path, None).await?;
            let count = page.len();

            for wire in page {
                messages.push(ChatMessage::try_from(wire)?);
            }
            if count < PAGE_LIMIT {
                break;
            }
            before = messages.last().map(|m| m.id);
        }

        Ok(messages)
    }

    async fn send(&self, channel_id: u64, message: OutgoingMessage) -> ChatResult<PostedMessage> {
        let body = message_json(&message);
        let wire: WireMessage = self
            .call_json(
                Method::POST,
                &format!("/channels/{channel_id}/messages"),
                Some(&body),
            )
            .await?;
        let id = snowflake(&wire.id)?;
        if let Some(view) = message.view {
            self.views.insert(id, view);
        }

        let guild_id = match self.channel_guild(channel_id).await {
            Ok(guild) => guild,
            Err(e) => {
                tracing::warn!("could not resolve guild of channel {channel_id}: {e}");
                None
            }
        };

        Ok(PostedMessage {
            id,
            channel_id,
            guild_id,
        })
    }

    async fn delete(&self, channel_id: u64, message_id: u64) -> ChatResult<()> {
        self.views.remove(&message_id);
        let response = self
            .call(
                Method::DELETE,
                &format!("/channels/{channel_id}/messages/{message_id}"),
                None,
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ChatError::NotFound(message_id));
        }
        check(response).await?;
        Ok(())
    }

    async fn register_view(&self, view: ModerationView, message_id: u64) -> ChatResult<()> {
        self.views.insert(message_id, view);
        Ok(())
    }

    async fn bot_user(&self) -> ChatResult<ChatUser> {
        let user = self
            .bot
            .get_or_try_init(|| async {
                let wire: WireUser = self.call_json(Method::GET, "/users/@me", None).await?;
                Ok::<_, ChatError>(ChatUser {
                    id: snowflake(&wire.id)?,
                    name: wire.global_name.unwrap_or(wire.username),
                })
            })
            .await?;
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn wire_message(id: u64) -> Value {
        json!({
            "id": id.to_string(),
            "channel_id": "10",
            "author": { "id": "1", "username": "modbridge" },
            "content": "",
            "embeds": [{ "title": format!("card {id}"), "fields": [] }],
        })
    }

    #[test]
    fn test_components_for_forum_card() {
        let rows = view_components(ModerationView::ForumModeration);
        let select = &rows[0]["components"][0];
        assert_eq!(select["custom_id"], ids::REASON_DROPDOWN);
        assert_eq!(select["options"].as_array().unwrap().len(), 6);
        assert_eq!(select["options"][1]["value"], "2");
        let buttons = rows[1]["components"].as_array().unwrap();
        assert_eq!(buttons[2]["custom_id"], ids::FORUM_DENY_AND_BAN);
    }

    #[test]
    fn test_message_json_skips_absent_parts() {
        let body = message_json(&OutgoingMessage::text("hello"));
        assert_eq!(body, json!({ "content": "hello" }));

        let mut embed = Embed::new("t").field("a", "b", true);
        embed.color = Some(0x00FBFF);
        let body = message_json(&OutgoingMessage::embed(embed).with_view(ModerationView::AccountApproval));
        assert_eq!(body["embeds"][0]["fields"][0]["inline"], true);
        assert_eq!(body["embeds"][0]["color"], 0x00FBFF);
        assert_eq!(body["components"][0]["components"][1]["custom_id"], ids::ACCOUNT_DENY);
    }

    #[tokio::test]
    async fn test_history_paginates() {
        let server = MockServer::start().await;
        let first: Vec<Value> = (0..100).map(|i| wire_message(1000 - i)).collect();
        Mock::given(method("GET"))
            .and(path("/channels/10/messages"))
            .and(query_param("before", "901"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([wire_message(900)])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/10/messages"))
            .and(header("Authorization", "Bot tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first))
            .mount(&server)
            .await;

        let rest = DiscordRest::with_api_base("tok", &server.uri());
        let history = rest.history(10).await.unwrap();
        assert_eq!(history.len(), 101);
        assert_eq!(history[100].id, 900);
        assert_eq!(history[0].embeds[0].title, "card 1000");
    }

    #[tokio::test]
    async fn test_delete_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/channels/10/messages/5"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/channels/10/messages/6"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let rest = DiscordRest::with_api_base("tok", &server.uri());
        assert!(matches!(rest.delete(10, 5).await, Err(ChatError::NotFound(5))));
        rest.delete(10, 6).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_registers_view_and_guild() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/10/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(wire_message(77)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "10", "guild_id": "3" })))
            .expect(1)
            .mount(&server)
            .await;

        let rest = DiscordRest::with_api_base("tok", &server.uri());
        let message = OutgoingMessage::embed(Embed::new("card")).with_view(ModerationView::AccountApproval);
        let posted = rest.send(10, message.clone()).await.unwrap();
        assert_eq!(posted.guild_id, Some(3));
        assert_eq!(rest.view_for(77), Some(ModerationView::AccountApproval));

        // Guild lookups are cached per channel.
        rest.send(10, message).await.unwrap();
    }

    #[tokio::test]
    async fn test_role_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/3/roles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "31", "name": "Moderator" },
                { "id": "32", "name": "Member" },
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let rest = DiscordRest::with_api_base("tok", &server.uri());
        assert_eq!(rest.role_names(3, &[31]).await.unwrap(), vec!["Moderator"]);
        assert_eq!(rest.role_names(3, &[32, 31]).await.unwrap(), vec!["Member", "Moderator"]);
    }
}
