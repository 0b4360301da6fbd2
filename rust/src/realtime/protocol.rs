// ActionCable framing for the account/user room channel.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ChannelError;
use crate::state::{Conversation, ConversationPatch, Credential, Message, NotificationRecord};
use crate::wire::{ConversationDto, IdRef, MessageDto, NotificationDto};

pub const ROOM_CHANNEL: &str = "RoomChannel";

/// Typed pub/sub events the rest of the core consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    ConversationCreated(Conversation),
    ConversationUpdated(ConversationPatch),
    MessageCreated(Message),
    MessageUpdated(Message),
    TypingStatusChanged {
        conversation_id: u64,
        user_id: u64,
        user_name: String,
        is_typing: bool,
    },
    NotificationPushed(NotificationRecord),
    PresenceUpdated {
        online_user_ids: Vec<u64>,
    },
}

impl RealtimeEvent {
    pub fn conversation_id(&self) -> Option<u64> {
        match self {
            RealtimeEvent::ConversationCreated(c) => Some(c.id),
            RealtimeEvent::ConversationUpdated(p) => Some(p.id),
            RealtimeEvent::MessageCreated(m) | RealtimeEvent::MessageUpdated(m) => {
                Some(m.conversation_id)
            }
            RealtimeEvent::TypingStatusChanged {
                conversation_id, ..
            } => Some(*conversation_id),
            RealtimeEvent::NotificationPushed(n) => n.conversation_id,
            RealtimeEvent::PresenceUpdated { .. } => None,
        }
    }

    /// Log-safe event tag.
    pub fn tag(&self) -> &'static str {
        match self {
            RealtimeEvent::ConversationCreated(_) => "ConversationCreated",
            RealtimeEvent::ConversationUpdated(_) => "ConversationUpdated",
            RealtimeEvent::MessageCreated(_) => "MessageCreated",
            RealtimeEvent::MessageUpdated(_) => "MessageUpdated",
            RealtimeEvent::TypingStatusChanged { .. } => "TypingStatusChanged",
            RealtimeEvent::NotificationPushed(_) => "NotificationPushed",
            RealtimeEvent::PresenceUpdated { .. } => "PresenceUpdated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Welcome,
    Ping,
    ConfirmSubscription,
    RejectSubscription,
    Disconnect {
        reason: Option<String>,
        reconnect: bool,
    },
    Event(RealtimeEvent),
    /// Well-formed frame we have no use for (unknown event names included).
    Ignored,
}

impl ServerFrame {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            ServerFrame::RejectSubscription => true,
            ServerFrame::Disconnect { reason, .. } => reason.as_deref() == Some("unauthorized"),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<Value>,
    reason: Option<String>,
    reconnect: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TypingDto {
    conversation: IdRef,
    user: IdRef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NotificationPushDto {
    notification: Option<NotificationDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PresenceDto {
    users: serde_json::Map<String, Value>,
}

/// The identifier string ActionCable expects, itself JSON encoded.
pub fn identifier(credential: &Credential) -> String {
    json!({
        "channel": ROOM_CHANNEL,
        "pubsub_token": credential.pubsub_token,
        "account_id": credential.account_id,
        "user_id": credential.user_id,
    })
    .to_string()
}

pub fn subscribe_command(credential: &Credential) -> String {
    json!({
        "command": "subscribe",
        "identifier": identifier(credential),
    })
    .to_string()
}

pub fn decode_frame(text: &str) -> Result<ServerFrame, ChannelError> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| ChannelError::Protocol(format!("undecodable frame: {e}")))?;

    match raw.kind.as_deref() {
        Some("welcome") => return Ok(ServerFrame::Welcome),
        Some("ping") => return Ok(ServerFrame::Ping),
        Some("confirm_subscription") => return Ok(ServerFrame::ConfirmSubscription),
        Some("reject_subscription") => return Ok(ServerFrame::RejectSubscription),
        Some("disconnect") => {
            return Ok(ServerFrame::Disconnect {
                reason: raw.reason,
                reconnect: raw.reconnect.unwrap_or(true),
            })
        }
        Some(_) => return Ok(ServerFrame::Ignored),
        None => {}
    }

    let Some(message) = raw.message else {
        return Ok(ServerFrame::Ignored);
    };
    let event: RawEvent = serde_json::from_value(message)
        .map_err(|e| ChannelError::Protocol(format!("undecodable event: {e}")))?;
    Ok(decode_event(&event.event, event.data)?
        .map(ServerFrame::Event)
        .unwrap_or(ServerFrame::Ignored))
}

fn decode_event(name: &str, data: Value) -> Result<Option<RealtimeEvent>, ChannelError> {
    let bad = |e: serde_json::Error| ChannelError::Protocol(format!("{name}: {e}"));
    let event = match name {
        "conversation.created" => RealtimeEvent::ConversationCreated(
            serde_json::from_value::<ConversationDto>(data)
                .map_err(bad)?
                .into(),
        ),
        "conversation.updated"
        | "conversation.status_changed"
        | "conversation.read"
        | "conversation.contact_changed"
        | "assignee.changed" => RealtimeEvent::ConversationUpdated(
            serde_json::from_value::<ConversationDto>(data)
                .map_err(bad)?
                .into(),
        ),
        "message.created" => RealtimeEvent::MessageCreated(
            serde_json::from_value::<MessageDto>(data).map_err(bad)?.into(),
        ),
        "message.updated" => RealtimeEvent::MessageUpdated(
            serde_json::from_value::<MessageDto>(data).map_err(bad)?.into(),
        ),
        "conversation.typing_on" | "conversation.typing_off" => {
            let t: TypingDto = serde_json::from_value(data).map_err(bad)?;
            let Some(conversation_id) = t.conversation.id else {
                return Err(ChannelError::Protocol(format!(
                    "{name}: missing conversation id"
                )));
            };
            RealtimeEvent::TypingStatusChanged {
                conversation_id,
                user_id: t.user.id.unwrap_or_default(),
                user_name: t.user.name.unwrap_or_default(),
                is_typing: name == "conversation.typing_on",
            }
        }
        "notification.created" => {
            let push: NotificationPushDto = serde_json::from_value(data).map_err(bad)?;
            let Some(notification) = push.notification else {
                return Err(ChannelError::Protocol(format!(
                    "{name}: missing notification"
                )));
            };
            RealtimeEvent::NotificationPushed(notification.into())
        }
        "presence.update" => {
            let p: PresenceDto = serde_json::from_value(data).map_err(bad)?;
            let mut online_user_ids: Vec<u64> = p
                .users
                .iter()
                .filter(|(_, status)| status.as_str() != Some("offline"))
                .filter_map(|(id, _)| id.parse().ok())
                .collect();
            online_user_ids.sort_unstable();
            RealtimeEvent::PresenceUpdated { online_user_ids }
        }
        other => {
            tracing::debug!(event = other, "ignoring unknown pub/sub event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}
