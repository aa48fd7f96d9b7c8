//! Minimal Discord gateway client.
//!
//! Identifies, keeps the heartbeat, registers the slash commands once
//! ready, and turns `INTERACTION_CREATE` events into [`Interaction`]s and
//! [`CommandInvocation`]s for the router. Everything else the gateway
//! sends is ignored. The connection is re-established whenever it drops.

use super::{ids, snowflake, DiscordRest};
use crate::chat::ModerationView;
use crate::error::ChatError;
use crate::interaction::{
    reason_problem, CommandInvocation, Interaction, InteractionKind, InteractionRouter, Reviewer,
    SlashCommand, REVIEW_WIKI_ACCOUNT, STATS_AUTOMOD,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;

pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// GUILDS only; interactions need no privileged intents.
const INTENTS: u64 = 1;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;

const CALLBACK_MODAL: u8 = 9;
const CALLBACK_DEFERRED_UPDATE: u8 = 6;
const CALLBACK_DEFERRED_MESSAGE: u8 = 5;
const CALLBACK_MESSAGE: u8 = 4;
const EPHEMERAL: u64 = 1 << 6;

const APPLICATION_COMMAND: u64 = 2;
const MESSAGE_COMPONENT: u64 = 3;
const MODAL_SUBMIT: u64 = 5;

#[derive(Debug, Deserialize)]
struct Payload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// The parts of an `INTERACTION_CREATE` payload we use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInteraction {
    pub id: String,
    pub token: String,
    /// Card the control sits on; `None` for slash commands.
    pub message_id: Option<u64>,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub user_id: u64,
    pub display_name: String,
    pub role_ids: Vec<u64>,
    pub event: RawEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Button(String),
    Select { custom_id: String, values: Vec<String> },
    ModalSubmit { custom_id: String, fields: Vec<(String, String)> },
    Command { name: String, options: Vec<(String, String)> },
}

/// What to answer to a raw interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Immediate ephemeral reply; nothing dispatched.
    Reply(String),
    /// Acknowledge silently.
    Acknowledge,
    /// Open a modal.
    Modal(Value),
    /// Defer, dispatch, then edit the deferred reply.
    Dispatch(Interaction),
    /// Defer, run the command, then edit the deferred reply.
    Command(CommandInvocation),
}

fn id_field(value: &Value, key: &str) -> Option<u64> {
    value.get(key)?.as_str().and_then(|raw| snowflake(raw).ok())
}

/// Slash command options as `(name, value)` text pairs.
fn command_options(data: &Value) -> Vec<(String, String)> {
    data.get("options")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|option| {
            let name = option.get("name")?.as_str()?.to_string();
            let value = match option.get("value")? {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            Some((name, value))
        })
        .collect()
}

/// Parse an `INTERACTION_CREATE` payload. `None` for kinds we do not handle.
pub fn parse_interaction(d: &Value) -> Option<RawInteraction> {
    let kind = d.get("type")?.as_u64()?;
    let data = d.get("data")?;
    let custom_id = || data.get("custom_id")?.as_str().map(str::to_string);

    let event = match kind {
        APPLICATION_COMMAND => RawEvent::Command {
            name: data.get("name")?.as_str()?.to_string(),
            options: command_options(data),
        },
        MESSAGE_COMPONENT => match data.get("component_type").and_then(Value::as_u64) {
            Some(2) => RawEvent::Button(custom_id()?),
            Some(3) => RawEvent::Select {
                custom_id: custom_id()?,
                values: data
                    .get("values")
                    .and_then(Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            _ => return None,
        },
        MODAL_SUBMIT => {
            let fields = data
                .get("components")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|row| row.get("components")?.as_array())
                .flatten()
                .filter_map(|input| {
                    Some((
                        input.get("custom_id")?.as_str()?.to_string(),
                        input.get("value")?.as_str().unwrap_or("").to_string(),
                    ))
                })
                .collect();
            RawEvent::ModalSubmit {
                custom_id: custom_id()?,
                fields,
            }
        }
        _ => return None,
    };

    let message = d.get("message");
    let message_id = message.and_then(|m| id_field(m, "id"));
    if message_id.is_none() && kind != APPLICATION_COMMAND {
        return None;
    }
    let member = d.get("member")?;
    let user = member.get("user")?;
    let display_name = member
        .get("nick")
        .and_then(Value::as_str)
        .or_else(|| user.get("global_name").and_then(Value::as_str))
        .or_else(|| user.get("username").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();

    Some(RawInteraction {
        id: d.get("id")?.as_str()?.to_string(),
        token: d.get("token")?.as_str()?.to_string(),
        message_id,
        channel_id: id_field(d, "channel_id")
            .or_else(|| message.and_then(|m| id_field(m, "channel_id")))?,
        guild_id: id_field(d, "guild_id"),
        user_id: id_field(user, "id")?,
        display_name,
        role_ids: member
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(|r| r.as_str().and_then(|raw| snowflake(raw).ok()))
                    .collect()
            })
            .unwrap_or_default(),
        event,
    })
}

/// Slash command definitions, in the shape of a bulk overwrite.
pub fn command_definitions() -> Value {
    json!([
        {
            "name": REVIEW_WIKI_ACCOUNT,
            "type": 1,
            "description": "Sends the request caught by automod to the review channel.",
            "dm_permission": false,
            "options": [{
                "type": 4,
                "name": "acrid",
                "description": "Account Request ID",
                "required": true,
                "min_value": 1,
            }],
        },
        {
            "name": STATS_AUTOMOD,
            "type": 1,
            "description": "Display automod debug statistics.",
            "dm_permission": false,
            "options": [{
                "type": 3,
                "name": "action",
                "description": "Which decisions to evaluate (default: denied)",
                "required": false,
                "choices": [
                    { "name": "denied", "value": "denied" },
                    { "name": "approved", "value": "approved" },
                ],
            }],
        },
    ])
}

fn text_input(custom_id: &str, label: &str, placeholder: &str, style: u8, required: bool) -> Value {
    json!({
        "type": 1,
        "components": [{
            "type": 4,
            "custom_id": custom_id,
            "label": label,
            "placeholder": placeholder,
            "style": style,
            "required": required,
        }],
    })
}

fn deny_modal() -> Value {
    json!({
        "custom_id": ids::DENY_MODAL,
        "title": "Disapprove Reason",
        "components": [text_input(
            ids::REASON_INPUT,
            "Reason",
            "This will be displayed to the poster, on top of the disapproval category.",
            2,
            false,
        )],
    })
}

fn ban_modal() -> Value {
    json!({
        "custom_id": ids::BAN_MODAL,
        "title": "Confirm Ban",
        "components": [
            text_input(ids::CONFIRM_INPUT, "Confirm", "Type CONFIRM to issue ban.", 1, true),
            text_input(ids::PUBLIC_REASON_INPUT, "Ban Reason Shown To User", "Optional", 2, false),
        ],
    })
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> &'a str {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

/// Decide how to answer a raw interaction. `selected` holds the reason
/// each forum card's dropdown was last set to.
pub fn plan(
    raw: &RawInteraction,
    roles: Vec<String>,
    view: Option<ModerationView>,
    selected: &DashMap<u64, u8>,
) -> Step {
    let user = Reviewer {
        id: raw.user_id,
        display_name: raw.display_name.clone(),
        roles,
    };

    if let RawEvent::Command { name, options } = &raw.event {
        return match SlashCommand::from_options(name, options) {
            Some(command) => Step::Command(CommandInvocation {
                channel_id: raw.channel_id,
                user,
                command,
            }),
            None => Step::Reply(format!("Unknown command: /{name}")),
        };
    }

    let Some(message_id) = raw.message_id else {
        return Step::Reply("Unknown control.".to_string());
    };
    if view.is_none() {
        return Step::Reply("This card is no longer tracked.".to_string());
    }

    let reason_code = selected.get(&message_id).map(|r| *r);
    let dispatch = |kind| {
        Step::Dispatch(Interaction {
            message_id,
            channel_id: raw.channel_id,
            user: user.clone(),
            kind,
        })
    };

    match &raw.event {
        RawEvent::Select { custom_id, values } if custom_id == ids::REASON_DROPDOWN => {
            match values.first().and_then(|v| v.parse::<u8>().ok()) {
                Some(code) => {
                    selected.insert(message_id, code);
                    Step::Acknowledge
                }
                None => Step::Reply(crate::interaction::MISSING_REASON_REPLY.to_string()),
            }
        }
        RawEvent::Button(id) if id == ids::ACCOUNT_APPROVE || id == ids::FORUM_APPROVE => {
            dispatch(InteractionKind::Approve)
        }
        RawEvent::Button(id) if id == ids::ACCOUNT_DENY => dispatch(InteractionKind::Deny {
            reason_code: None,
            reason_text: String::new(),
        }),
        RawEvent::Button(id) if id == ids::FORUM_DENY || id == ids::FORUM_DENY_AND_BAN => {
            if let Some(problem) = reason_problem(reason_code) {
                return Step::Reply(problem.to_string());
            }
            if id == ids::FORUM_DENY {
                Step::Modal(deny_modal())
            } else {
                Step::Modal(ban_modal())
            }
        }
        RawEvent::ModalSubmit { custom_id, fields } if custom_id == ids::DENY_MODAL => {
            dispatch(InteractionKind::Deny {
                reason_code,
                reason_text: field(fields, ids::REASON_INPUT).to_string(),
            })
        }
        RawEvent::ModalSubmit { custom_id, fields } if custom_id == ids::BAN_MODAL => {
            dispatch(InteractionKind::DenyAndBan {
                reason_code,
                confirm: field(fields, ids::CONFIRM_INPUT).to_string(),
                public_reason: field(fields, ids::PUBLIC_REASON_INPUT).to_string(),
            })
        }
        _ => Step::Reply("Unknown control.".to_string()),
    }
}

/// Gateway connection feeding the [`InteractionRouter`].
pub struct Gateway {
    rest: Arc<DiscordRest>,
    router: Arc<InteractionRouter>,
    url: String,
    application_id: Arc<AtomicU64>,
    selected: Arc<DashMap<u64, u8>>,
}

impl Gateway {
    pub fn new(rest: Arc<DiscordRest>, router: Arc<InteractionRouter>) -> Self {
        Self {
            rest,
            router,
            url: GATEWAY_URL.to_string(),
            application_id: Arc::new(AtomicU64::new(0)),
            selected: Arc::new(DashMap::new()),
        }
    }

    /// Spawn the connection loop until shutdown is signaled.
    pub fn spawn(self, shutdown: Arc<Notify>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("gateway stopping");
                        break;
                    }
                    result = self.connect_once() => match result {
                        Ok(()) => tracing::info!("gateway connection closed, reconnecting"),
                        Err(e) => tracing::warn!("gateway connection failed: {e}"),
                    }
                }
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        })
    }

    async fn connect_once(&self) -> Result<(), ChatError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ChatError::Unavailable(e.to_string()))?;
        let (mut write, mut read) = socket.split();

        let hello = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let payload: Payload = serde_json::from_str(&text)
                        .map_err(|e| ChatError::Request(format!("bad gateway payload: {e}")))?;
                    if payload.op == OP_HELLO {
                        break payload;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ChatError::Unavailable(e.to_string())),
                None => return Ok(()),
            }
        };

        let period = Duration::from_millis(
            hello
                .d
                .get("heartbeat_interval")
                .and_then(Value::as_u64)
                .unwrap_or(41_250),
        );
        let jitter = period.mul_f64(rand::thread_rng().gen_range(0.0..1.0));
        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + jitter, period);

        let identify = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.rest.token(),
                "intents": INTENTS,
                "properties": { "os": std::env::consts::OS, "browser": "modbridge", "device": "modbridge" },
            },
        });
        send(&mut write, &identify).await?;

        let mut sequence: Option<u64> = None;
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    send(&mut write, &json!({ "op": OP_HEARTBEAT, "d": sequence })).await?;
                }
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!("gateway closed by peer: {frame:?}");
                            return Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(ChatError::Unavailable(e.to_string())),
                        None => return Ok(()),
                    };
                    let payload: Payload = match serde_json::from_str(&text) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!("skipping unreadable gateway payload: {e}");
                            continue;
                        }
                    };
                    if payload.s.is_some() {
                        sequence = payload.s;
                    }
                    match payload.op {
                        OP_DISPATCH => self.on_dispatch(payload.t.as_deref(), payload.d),
                        OP_HEARTBEAT => {
                            send(&mut write, &json!({ "op": OP_HEARTBEAT, "d": sequence })).await?;
                        }
                        OP_RECONNECT | OP_INVALID_SESSION => {
                            tracing::info!("gateway asked for a new session (op {})", payload.op);
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn on_dispatch(&self, event: Option<&str>, d: Value) {
        match event {
            Some("READY") => {
                let application_id = d
                    .get("application")
                    .and_then(|a| id_field(a, "id"))
                    .unwrap_or_default();
                self.application_id.store(application_id, Ordering::SeqCst);
                tracing::info!("gateway ready as application {application_id}");

                let rest = self.rest.clone();
                tokio::spawn(async move {
                    match rest
                        .register_commands(application_id, &command_definitions())
                        .await
                    {
                        Ok(()) => tracing::info!("slash commands registered"),
                        Err(e) => tracing::warn!("failed to register slash commands: {e}"),
                    }
                });
            }
            Some("INTERACTION_CREATE") => {
                let Some(raw) = parse_interaction(&d) else {
                    tracing::debug!("ignoring unsupported interaction");
                    return;
                };
                let rest = self.rest.clone();
                let router = self.router.clone();
                let selected = self.selected.clone();
                let application_id = self.application_id.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        answer(&rest, &router, &selected, &application_id, raw).await
                    {
                        tracing::warn!("failed to answer interaction: {e}");
                    }
                });
            }
            _ => {}
        }
    }
}

async fn send<S>(write: &mut S, payload: &Value) -> Result<(), ChatError>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    write
        .send(Message::Text(payload.to_string()))
        .await
        .map_err(|e| ChatError::Unavailable(e.to_string()))
}

async fn answer(
    rest: &DiscordRest,
    router: &InteractionRouter,
    selected: &DashMap<u64, u8>,
    application_id: &AtomicU64,
    raw: RawInteraction,
) -> Result<(), ChatError> {
    let roles = match raw.guild_id {
        Some(guild_id) => rest.role_names(guild_id, &raw.role_ids).await?,
        None => Vec::new(),
    };
    let view = raw.message_id.and_then(|id| rest.view_for(id));

    match plan(&raw, roles, view, selected) {
        Step::Reply(text) => {
            let body = json!({
                "type": CALLBACK_MESSAGE,
                "data": { "content": text, "flags": EPHEMERAL },
            });
            rest.interaction_callback(&raw.id, &raw.token, &body).await
        }
        Step::Acknowledge => {
            let body = json!({ "type": CALLBACK_DEFERRED_UPDATE });
            rest.interaction_callback(&raw.id, &raw.token, &body).await
        }
        Step::Modal(modal) => {
            let body = json!({ "type": CALLBACK_MODAL, "data": modal });
            rest.interaction_callback(&raw.id, &raw.token, &body).await
        }
        Step::Dispatch(interaction) => {
            let body = json!({
                "type": CALLBACK_DEFERRED_MESSAGE,
                "data": { "flags": EPHEMERAL },
            });
            rest.interaction_callback(&raw.id, &raw.token, &body).await?;

            let message_id = interaction.message_id;
            let reply = router.handle(interaction).await;
            if rest.view_for(message_id).is_none() {
                selected.remove(&message_id);
            }
            rest.edit_original_response(application_id.load(Ordering::SeqCst), &raw.token, &reply)
                .await
        }
        Step::Command(invocation) => {
            let body = json!({
                "type": CALLBACK_DEFERRED_MESSAGE,
                "data": { "flags": EPHEMERAL },
            });
            rest.interaction_callback(&raw.id, &raw.token, &body).await?;

            let reply = router.handle_command(invocation).await;
            rest.edit_original_response(application_id.load(Ordering::SeqCst), &raw.token, &reply)
                .await
        }
    }
}
