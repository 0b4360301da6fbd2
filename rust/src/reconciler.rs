//! Conversation reconciler: one id-keyed map fed by page fetches and realtime events.
//!
//! Every conversation exists at most once regardless of how many pages or events
//! mention it. Scope membership is computed when a view is built, never stored.
//! Messages for conversations that have not been seen yet are parked in a bounded
//! queue and replayed when the conversation arrives.

use std::collections::{HashMap, VecDeque};

use crate::realtime::RealtimeEvent;
use crate::state::{Conversation, ConversationPatch, ConversationStatus, Message, Scope};

pub const DEFAULT_PENDING_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    Create(Message),
    Update(Message),
}

impl PendingOp {
    fn conversation_id(&self) -> u64 {
        match self {
            PendingOp::Create(m) | PendingOp::Update(m) => m.conversation_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Unchanged,
    Changed,
    /// The conversation is unknown and should be fetched. Message events are parked
    /// until it arrives; a conversation update is dropped since the fetch carries it.
    Deferred { conversation_id: u64 },
}

/// Secondary view filters layered over scope membership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewFilter {
    pub status: Option<ConversationStatus>,
    pub inbox_id: Option<u64>,
}

impl ViewFilter {
    fn admits(&self, conversation: &Conversation) -> bool {
        self.status.is_none_or(|s| s == conversation.status)
            && self.inbox_id.is_none_or(|id| id == conversation.inbox_id)
    }
}

#[derive(Debug)]
pub struct Reconciler {
    user_id: u64,
    conversations: HashMap<u64, Conversation>,
    pending: VecDeque<PendingOp>,
    pending_capacity: usize,
}

impl Reconciler {
    pub fn new(user_id: u64, pending_capacity: usize) -> Self {
        Self {
            user_id,
            conversations: HashMap::new(),
            pending: VecDeque::new(),
            pending_capacity: pending_capacity.max(1),
        }
    }

    /// Forget everything; used when a different agent signs in.
    pub fn reset(&mut self, user_id: u64) {
        self.user_id = user_id;
        self.conversations.clear();
        self.pending.clear();
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, conversation_id: u64) -> Option<&Conversation> {
        self.conversations.get(&conversation_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_for(&self, conversation_id: u64) -> usize {
        self.pending
            .iter()
            .filter(|op| op.conversation_id() == conversation_id)
            .count()
    }

    /// Returns whether anything visible changed.
    pub fn ingest_page(&mut self, conversations: Vec<Conversation>) -> bool {
        let mut changed = false;
        for conversation in conversations {
            changed |= self.ingest_conversation(conversation);
        }
        changed
    }

    /// Insert or merge one conversation, then replay anything parked for it.
    pub fn ingest_conversation(&mut self, incoming: Conversation) -> bool {
        let id = incoming.id;
        let mut changed = match self.conversations.get_mut(&id) {
            Some(existing) => merge_conversation(existing, incoming),
            None => {
                self.conversations.insert(id, incoming);
                true
            }
        };
        changed |= self.replay_pending(id);
        changed
    }

    pub fn ingest_event(&mut self, event: RealtimeEvent) -> Ingest {
        let changed = match event {
            RealtimeEvent::ConversationCreated(c) => self.ingest_conversation(c),
            RealtimeEvent::ConversationUpdated(patch) => {
                let conversation_id = patch.id;
                let Some(existing) = self.conversations.get_mut(&conversation_id) else {
                    return Ingest::Deferred { conversation_id };
                };
                apply_patch(existing, patch)
            }
            RealtimeEvent::MessageCreated(m) => return self.apply_or_park(PendingOp::Create(m)),
            RealtimeEvent::MessageUpdated(m) => return self.apply_or_park(PendingOp::Update(m)),
            RealtimeEvent::TypingStatusChanged { .. }
            | RealtimeEvent::NotificationPushed(_)
            | RealtimeEvent::PresenceUpdated { .. } => false,
        };
        if changed {
            Ingest::Changed
        } else {
            Ingest::Unchanged
        }
    }

    /// Conversations visible in `scope`, newest activity first, ties broken by id.
    pub fn deduplicated_view(&self, scope: Scope, filter: &ViewFilter) -> Vec<Conversation> {
        let mut view: Vec<Conversation> = self
            .conversations
            .values()
            .filter(|c| c.tag(self.user_id).visible_in(scope) && filter.admits(c))
            .cloned()
            .collect();
        view.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then(b.id.cmp(&a.id))
        });
        view
    }

    fn apply_or_park(&mut self, op: PendingOp) -> Ingest {
        let conversation_id = op.conversation_id();
        let Some(conversation) = self.conversations.get_mut(&conversation_id) else {
            self.park(op);
            return Ingest::Deferred { conversation_id };
        };
        if apply_op(conversation, op) {
            Ingest::Changed
        } else {
            Ingest::Unchanged
        }
    }

    fn park(&mut self, op: PendingOp) {
        if self.pending.contains(&op) {
            return;
        }
        if self.pending.len() >= self.pending_capacity {
            if let Some(evicted) = self.pending.pop_front() {
                tracing::warn!(
                    conversation_id = evicted.conversation_id(),
                    capacity = self.pending_capacity,
                    "pending event queue full, evicting oldest"
                );
            }
        }
        tracing::debug!(
            conversation_id = op.conversation_id(),
            "parking event for unknown conversation"
        );
        self.pending.push_back(op);
    }

    fn replay_pending(&mut self, conversation_id: u64) -> bool {
        if !self
            .pending
            .iter()
            .any(|op| op.conversation_id() == conversation_id)
        {
            return false;
        }
        let (ready, rest): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|op| op.conversation_id() == conversation_id);
        self.pending = rest;

        let Some(conversation) = self.conversations.get_mut(&conversation_id) else {
            return false;
        };
        tracing::debug!(conversation_id, count = ready.len(), "replaying parked events");
        let mut changed = false;
        for op in ready {
            changed |= apply_op(conversation, op);
        }
        changed
    }
}

fn apply_op(conversation: &mut Conversation, op: PendingOp) -> bool {
    match op {
        PendingOp::Create(m) => append_message(conversation, m),
        PendingOp::Update(m) => update_message(conversation, m),
    }
}

fn append_message(conversation: &mut Conversation, message: Message) -> bool {
    if conversation.messages.iter().any(|m| m.id == message.id) {
        return false;
    }
    conversation.last_activity_at = conversation.last_activity_at.max(message.created_at);
    conversation.messages.push(message);
    true
}

// An update for a message we never saw is treated as its creation.
fn update_message(conversation: &mut Conversation, message: Message) -> bool {
    match conversation.messages.iter_mut().find(|m| m.id == message.id) {
        Some(existing) => {
            if existing.content == message.content && existing.status == message.status {
                return false;
            }
            existing.content = message.content;
            existing.status = message.status;
            true
        }
        None => append_message(conversation, message),
    }
}

fn merge_conversation(existing: &mut Conversation, incoming: Conversation) -> bool {
    apply_patch(existing, incoming.into())
}

// Fields the patch leaves out keep their stored value. Activity only moves forward.
fn apply_patch(existing: &mut Conversation, patch: ConversationPatch) -> bool {
    let mut changed = false;

    macro_rules! replace {
        ($field:ident) => {
            if let Some(value) = patch.$field {
                if existing.$field != value {
                    existing.$field = value;
                    changed = true;
                }
            }
        };
    }
    replace!(inbox_id);
    replace!(assignee_id);
    replace!(status);
    replace!(unread_count);
    if let Some(name) = patch.contact_name {
        if existing.contact_name.as_deref() != Some(name.as_str()) {
            existing.contact_name = Some(name);
            changed = true;
        }
    }
    if let Some(at) = patch.last_activity_at {
        if at > existing.last_activity_at {
            existing.last_activity_at = at;
            changed = true;
        }
    }
    for message in patch.messages {
        changed |= append_message(existing, message);
    }
    changed
}
