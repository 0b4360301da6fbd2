use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, ScopeError};

/// Assignee partition the conversation list is browsed by.
#[derive(
    uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Mine,
    Unassigned,
    All,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Mine, Scope::Unassigned, Scope::All];

    /// Wire name used by the conversations endpoint (`assignee_type`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Mine => "mine",
            Scope::Unassigned => "unassigned",
            Scope::All => "all",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mine" => Ok(Scope::Mine),
            "unassigned" => Ok(Scope::Unassigned),
            "all" => Ok(Scope::All),
            other => Err(ScopeError(other.to_string())),
        }
    }
}

/// Which partition a single conversation falls into, relative to the signed-in agent.
///
/// Derived on read from the assignee; never stored per scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssigneeTag {
    Mine,
    Unassigned,
    Other,
}

impl AssigneeTag {
    pub fn for_assignee(assignee_id: Option<u64>, user_id: u64) -> Self {
        match assignee_id {
            None => AssigneeTag::Unassigned,
            Some(id) if id == user_id => AssigneeTag::Mine,
            Some(_) => AssigneeTag::Other,
        }
    }

    pub fn visible_in(self, scope: Scope) -> bool {
        match scope {
            Scope::Mine => self == AssigneeTag::Mine,
            Scope::Unassigned => self == AssigneeTag::Unassigned,
            Scope::All => true,
        }
    }
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Resolved,
    Pending,
    Snoozed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Open => "open",
            ConversationStatus::Resolved => "resolved",
            ConversationStatus::Pending => "pending",
            ConversationStatus::Snoozed => "snoozed",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(ConversationStatus::Open),
            "resolved" => Ok(ConversationStatus::Resolved),
            "pending" => Ok(ConversationStatus::Pending),
            "snoozed" => Ok(ConversationStatus::Snoozed),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Incoming,
    Outgoing,
    Activity,
    Template,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub conversation_id: u64,
    pub content: String,
    pub created_at: i64,
    pub message_type: MessageType,
    pub status: MessageStatus,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    pub id: u64,
    pub inbox_id: u64,
    pub assignee_id: Option<u64>,
    pub status: ConversationStatus,
    pub unread_count: u32,
    pub last_activity_at: i64,
    pub contact_name: Option<String>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn tag(&self, user_id: u64) -> AssigneeTag {
        AssigneeTag::for_assignee(self.assignee_id, user_id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Partial update carried by conversation pub/sub events. `None` means the payload did
/// not mention the field; `assignee_id: Some(None)` is an explicit unassignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationPatch {
    pub id: u64,
    pub inbox_id: Option<u64>,
    pub assignee_id: Option<Option<u64>>,
    pub status: Option<ConversationStatus>,
    pub unread_count: Option<u32>,
    pub last_activity_at: Option<i64>,
    pub contact_name: Option<String>,
    pub messages: Vec<Message>,
}

impl From<Conversation> for ConversationPatch {
    fn from(c: Conversation) -> Self {
        ConversationPatch {
            id: c.id,
            inbox_id: Some(c.inbox_id),
            assignee_id: Some(c.assignee_id),
            status: Some(c.status),
            unread_count: Some(c.unread_count),
            last_activity_at: Some(c.last_activity_at),
            contact_name: c.contact_name,
            messages: c.messages,
        }
    }
}

/// Per-scope totals reported alongside every conversations page.
#[derive(uniffi::Record, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScopeCounts {
    pub mine: u32,
    pub unassigned: u32,
    pub all: u32,
}

impl ScopeCounts {
    pub fn for_scope(&self, scope: Scope) -> u32 {
        match scope {
            Scope::Mine => self.mine,
            Scope::Unassigned => self.unassigned,
            Scope::All => self.all,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct NotificationRecord {
    pub id: u64,
    pub notification_type: String,
    pub conversation_id: Option<u64>,
    pub read: bool,
    pub created_at: i64,
}

/// Ready-made credential handed over by the platform's auth layer.
#[derive(uniffi::Record, Clone, PartialEq, Eq)]
pub struct Credential {
    pub pubsub_token: String,
    pub account_id: u64,
    pub user_id: u64,
    pub api_access_token: Option<String>,
    /// Unix seconds; `None` means the token does not expire.
    pub expires_at: Option<i64>,
}

// Tokens never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("account_id", &self.account_id)
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn validate(&self, now: i64) -> Result<(), ChannelError> {
        if self.pubsub_token.trim().is_empty() {
            return Err(ChannelError::Auth("missing pub/sub token".into()));
        }
        if self.account_id == 0 || self.user_id == 0 {
            return Err(ChannelError::Auth("missing account or user id".into()));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(ChannelError::Auth("pub/sub token expired".into()));
            }
        }
        Ok(())
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Error { reason: String },
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct TypingEntry {
    pub conversation_id: u64,
    pub user_names: Vec<String>,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub connection: ConnectionState,
    pub scope: Scope,
    pub status_filter: ConversationStatus,
    pub inbox_filter: Option<u64>,
    /// Deduplicated, activity-ordered view of the current scope.
    pub conversations: Vec<Conversation>,
    pub counts: ScopeCounts,
    pub is_fetching: bool,
    pub all_loaded: bool,
    pub typing: Vec<TypingEntry>,
    pub online_agents: Vec<u64>,
    pub unread_notifications: u32,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            connection: ConnectionState::Closed,
            scope: Scope::Mine,
            status_filter: ConversationStatus::Open,
            inbox_filter: None,
            conversations: vec![],
            counts: ScopeCounts::default(),
            is_fetching: false,
            all_loaded: false,
            typing: vec![],
            online_agents: vec![],
            unread_notifications: 0,
            toast: None,
        }
    }
}

pub fn now_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
