// JSON shapes of the helpdesk REST API and pub/sub payloads, plus conversion into
// domain types. Everything is `#[serde(default)]`: the backend omits fields freely.

use serde::{Deserialize, Deserializer};

use crate::state::{
    Conversation, ConversationPatch, ConversationStatus, Message, MessageStatus, MessageType, NotificationRecord,
    ScopeCounts,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "M: Deserialize<'de> + Default, P: Deserialize<'de>"))]
pub struct Envelope<M, P> {
    pub data: EnvelopeData<M, P>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "M: Deserialize<'de> + Default, P: Deserialize<'de>"))]
pub struct EnvelopeData<M, P> {
    #[serde(default)]
    pub meta: M,
    #[serde(default = "Vec::new")]
    pub payload: Vec<P>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CountsMeta {
    pub mine_count: u32,
    pub unassigned_count: u32,
    pub all_count: u32,
}

impl From<CountsMeta> for ScopeCounts {
    fn from(m: CountsMeta) -> Self {
        ScopeCounts {
            mine: m.mine_count,
            unassigned: m.unassigned_count,
            all: m.all_count,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationMeta {
    pub unread_count: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdRef {
    pub id: Option<u64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConversationMetaDto {
    /// Outer `None`: key absent. `Some(None)`: explicitly `null`, i.e. unassigned.
    #[serde(deserialize_with = "present")]
    pub assignee: Option<Option<IdRef>>,
    pub sender: Option<IdRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConversationDto {
    pub id: u64,
    pub inbox_id: Option<u64>,
    pub status: Option<String>,
    pub unread_count: Option<u32>,
    pub timestamp: Option<i64>,
    pub last_activity_at: Option<i64>,
    pub meta: ConversationMetaDto,
    pub messages: Vec<MessageDto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageDto {
    pub id: u64,
    pub conversation_id: u64,
    pub content: Option<String>,
    pub created_at: i64,
    pub message_type: u8,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrimaryActorDto {
    pub id: Option<u64>,
    pub conversation_id: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationDto {
    pub id: u64,
    pub notification_type: String,
    pub primary_actor_type: Option<String>,
    pub primary_actor_id: Option<u64>,
    pub primary_actor: Option<PrimaryActorDto>,
    pub read_at: Option<serde_json::Value>,
    pub created_at: i64,
}

pub type ConversationsEnvelope = Envelope<CountsMeta, ConversationDto>;
pub type NotificationsEnvelope = Envelope<NotificationMeta, NotificationDto>;

impl From<MessageDto> for Message {
    fn from(m: MessageDto) -> Self {
        let message_type = match m.message_type {
            1 => MessageType::Outgoing,
            2 => MessageType::Activity,
            3 => MessageType::Template,
            _ => MessageType::Incoming,
        };
        let status = match m.status.as_deref() {
            Some("delivered") => MessageStatus::Delivered,
            Some("read") => MessageStatus::Read,
            Some("failed") => MessageStatus::Failed,
            _ => MessageStatus::Sent,
        };
        Message {
            id: m.id,
            conversation_id: m.conversation_id,
            content: m.content.unwrap_or_default(),
            created_at: m.created_at,
            message_type,
            status,
        }
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// Update events only carry what changed, so every field stays optional here.
impl From<ConversationDto> for ConversationPatch {
    fn from(c: ConversationDto) -> Self {
        let id = c.id;
        let messages: Vec<Message> = c
            .messages
            .into_iter()
            .map(|mut m| {
                if m.conversation_id == 0 {
                    m.conversation_id = id;
                }
                Message::from(m)
            })
            .collect();
        let newest_message = messages.iter().map(|m| m.created_at).max();
        let last_activity_at = match (c.last_activity_at.or(c.timestamp), newest_message) {
            (Some(at), Some(newest)) => Some(at.max(newest)),
            (at, newest) => at.or(newest),
        };
        ConversationPatch {
            id,
            inbox_id: c.inbox_id,
            assignee_id: c.meta.assignee.map(|a| a.and_then(|a| a.id)),
            status: c.status.as_deref().and_then(|s| s.parse().ok()),
            unread_count: c.unread_count,
            last_activity_at,
            contact_name: c.meta.sender.and_then(|s| s.name),
            messages,
        }
    }
}

// Pages and `conversation.created` describe the whole conversation: absent means default.
impl From<ConversationDto> for Conversation {
    fn from(c: ConversationDto) -> Self {
        let p = ConversationPatch::from(c);
        Conversation {
            id: p.id,
            inbox_id: p.inbox_id.unwrap_or_default(),
            assignee_id: p.assignee_id.flatten(),
            status: p.status.unwrap_or(ConversationStatus::Open),
            unread_count: p.unread_count.unwrap_or_default(),
            last_activity_at: p.last_activity_at.unwrap_or_default(),
            contact_name: p.contact_name,
            messages: p.messages,
        }
    }
}

impl From<NotificationDto> for NotificationRecord {
    fn from(n: NotificationDto) -> Self {
        let conversation_id = match n.primary_actor_type.as_deref() {
            Some("Conversation") => n
                .primary_actor_id
                .or_else(|| n.primary_actor.as_ref().and_then(|a| a.id)),
            _ => n.primary_actor.as_ref().and_then(|a| a.conversation_id),
        };
        let read = matches!(n.read_at, Some(ref v) if !v.is_null());
        NotificationRecord {
            id: n.id,
            notification_type: n.notification_type,
            conversation_id,
            read,
            created_at: n.created_at,
        }
    }
}
