#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deskline_core::error::FetchError;
use deskline_core::fetcher::{ConversationPage, NotificationPage, PageRequest};
use deskline_core::{
    AppReconciler, AppUpdate, Conversation, ConversationSource, ConversationStatus, Credential,
    Message, MessageStatus, MessageType, NotificationRecord, Scope, ScopeCounts,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

pub use deskline_test_utils::wait_until;

pub const AGENT: u64 = 7;

pub fn credential(user_id: u64) -> Credential {
    Credential {
        pubsub_token: format!("pubsub-{user_id}"),
        account_id: 1,
        user_id,
        api_access_token: Some("api-token".into()),
        expires_at: None,
    }
}

pub fn msg(id: u64, conversation_id: u64, created_at: i64) -> Message {
    Message {
        id,
        conversation_id,
        content: format!("message {id}"),
        created_at,
        message_type: MessageType::Incoming,
        status: MessageStatus::Sent,
    }
}

pub fn conv(id: u64, assignee_id: Option<u64>, last_activity_at: i64) -> Conversation {
    Conversation {
        id,
        inbox_id: 1,
        assignee_id,
        status: ConversationStatus::Open,
        unread_count: 0,
        last_activity_at,
        contact_name: Some(format!("contact {id}")),
        messages: vec![],
    }
}

pub fn notification(id: u64, read: bool) -> NotificationRecord {
    NotificationRecord {
        id,
        notification_type: "conversation_assignment".into(),
        conversation_id: Some(id),
        read,
        created_at: id as i64,
    }
}

pub fn write_config(data_dir: &str, extra: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("deskline_config.json");
    let mut v = serde_json::json!({
        "disable_network": true,
        "reconnect_base_ms": 20,
        "reconnect_max_ms": 200,
        "max_fetch_attempts": 1,
    });
    if let (Some(base), Some(extra)) = (v.as_object_mut(), extra.as_object()) {
        for (k, val) in extra {
            base.insert(k.clone(), val.clone());
        }
    }
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

pub fn ids(conversations: &[Conversation]) -> Vec<u64> {
    conversations.iter().map(|c| c.id).collect()
}

pub struct TestReconciler {
    updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl TestReconciler {
    pub fn new() -> (Self, Arc<Mutex<Vec<AppUpdate>>>) {
        let updates = Arc::new(Mutex::new(vec![]));
        (
            Self {
                updates: updates.clone(),
            },
            updates,
        )
    }
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

#[derive(Default)]
struct FakeState {
    pages: HashMap<(Scope, u32), Vec<Conversation>>,
    conversations: HashMap<u64, Conversation>,
    notifications: Vec<NotificationRecord>,
    meta: ScopeCounts,
    failing_pages: HashSet<(Scope, u32)>,
    reject_auth: bool,
    delay: Duration,
    page_requests: Vec<PageRequest>,
    conversation_requests: Vec<u64>,
    notification_requests: u32,
}

/// Scriptable in-memory backend. Pages without a script come back empty.
#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_page(&self, scope: Scope, page: u32, conversations: Vec<Conversation>) {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert((scope, page), conversations);
    }

    pub fn set_conversation(&self, conversation: Conversation) {
        self.state
            .lock()
            .unwrap()
            .conversations
            .insert(conversation.id, conversation);
    }

    pub fn set_notifications(&self, notifications: Vec<NotificationRecord>) {
        self.state.lock().unwrap().notifications = notifications;
    }

    pub fn set_meta(&self, meta: ScopeCounts) {
        self.state.lock().unwrap().meta = meta;
    }

    pub fn fail_page(&self, scope: Scope, page: u32, failing: bool) {
        let mut st = self.state.lock().unwrap();
        if failing {
            st.failing_pages.insert((scope, page));
        } else {
            st.failing_pages.remove(&(scope, page));
        }
    }

    pub fn reject_auth(&self, reject: bool) {
        self.state.lock().unwrap().reject_auth = reject;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.state.lock().unwrap().page_requests.clone()
    }

    pub fn requested_pages(&self, scope: Scope) -> Vec<u32> {
        self.page_requests()
            .into_iter()
            .filter(|r| r.scope == scope)
            .map(|r| r.page)
            .collect()
    }

    pub fn conversation_requests(&self) -> Vec<u64> {
        self.state.lock().unwrap().conversation_requests.clone()
    }

    pub fn notification_requests(&self) -> u32 {
        self.state.lock().unwrap().notification_requests
    }
}

impl ConversationSource for FakeSource {
    fn fetch_page(
        &self,
        request: PageRequest,
    ) -> BoxFuture<'static, Result<ConversationPage, FetchError>> {
        let (delay, result) = {
            let mut st = self.state.lock().unwrap();
            st.page_requests.push(request.clone());
            let result = if st.reject_auth {
                Err(FetchError::Auth("http 401 Unauthorized".into()))
            } else if st.failing_pages.contains(&(request.scope, request.page)) {
                Err(FetchError::Network("connection reset".into()))
            } else {
                Ok(ConversationPage {
                    conversations: st
                        .pages
                        .get(&(request.scope, request.page))
                        .cloned()
                        .unwrap_or_default(),
                    meta: st.meta,
                })
            };
            (st.delay, result)
        };
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }

    fn fetch_conversation(
        &self,
        conversation_id: u64,
    ) -> BoxFuture<'static, Result<Conversation, FetchError>> {
        let result = {
            let mut st = self.state.lock().unwrap();
            st.conversation_requests.push(conversation_id);
            st.conversations
                .get(&conversation_id)
                .cloned()
                .ok_or_else(|| FetchError::Network("http 404 Not Found".into()))
        };
        futures_util::future::ready(result).boxed()
    }

    fn fetch_notifications(
        &self,
        _page: u32,
    ) -> BoxFuture<'static, Result<NotificationPage, FetchError>> {
        let result = {
            let mut st = self.state.lock().unwrap();
            st.notification_requests += 1;
            Ok(NotificationPage {
                unread_count: st.notifications.iter().filter(|n| !n.read).count() as u32,
                notifications: st.notifications.clone(),
            })
        };
        futures_util::future::ready(result).boxed()
    }
}
