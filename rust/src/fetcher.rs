//! Paged conversation fetches from the helpdesk REST API.
//!
//! [`ConversationSource`] is the seam the core fetches through; [`HttpConversationSource`]
//! is the production binding. Sources never touch shared state: results flow back to the
//! app actor as messages.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::backoff::Backoff;
use crate::error::FetchError;
use crate::state::{Conversation, ConversationStatus, NotificationRecord, Scope, ScopeCounts};
use crate::wire::{ConversationDto, ConversationsEnvelope, NotificationsEnvelope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub scope: Scope,
    /// 1-based.
    pub page: u32,
    pub status: ConversationStatus,
    pub inbox_id: Option<u64>,
}

impl PageRequest {
    pub fn new(scope: Scope, page: u32) -> Self {
        Self {
            scope,
            page,
            status: ConversationStatus::Open,
            inbox_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPage {
    /// Empty means the scope has no further pages.
    pub conversations: Vec<Conversation>,
    pub meta: ScopeCounts,
}

impl ConversationPage {
    pub fn is_terminal(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPage {
    pub notifications: Vec<NotificationRecord>,
    pub unread_count: u32,
}

pub trait ConversationSource: Send + Sync + 'static {
    fn fetch_page(&self, request: PageRequest)
        -> BoxFuture<'static, Result<ConversationPage, FetchError>>;

    fn fetch_conversation(
        &self,
        conversation_id: u64,
    ) -> BoxFuture<'static, Result<Conversation, FetchError>>;

    fn fetch_notifications(&self, page: u32)
        -> BoxFuture<'static, Result<NotificationPage, FetchError>>;
}

#[derive(Debug, Clone)]
pub struct HttpConversationSource {
    client: reqwest::Client,
    base_url: String,
    account_id: u64,
    access_token: Option<String>,
}

impl HttpConversationSource {
    pub fn new(base_url: &str, account_id: u64, access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id,
            access_token,
        }
    }

    fn account_url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/accounts/{}/{}",
            self.base_url, self.account_id, path
        )
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let req = self.client.get(url).header("Accept", "application/json");
        match self.access_token.as_deref() {
            Some(token) => req.header("api_access_token", token),
            None => req,
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, FetchError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(FetchError::Auth(format!("http {status}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(200).collect();
        return Err(FetchError::Network(format!("http {status}: {excerpt}")));
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl ConversationSource for HttpConversationSource {
    fn fetch_page(
        &self,
        request: PageRequest,
    ) -> BoxFuture<'static, Result<ConversationPage, FetchError>> {
        if request.page == 0 {
            return futures_util::future::ready(Err(FetchError::InvalidRequest(
                "page numbers start at 1".into(),
            )))
            .boxed();
        }
        let mut query: Vec<(&'static str, String)> = vec![
            ("assignee_type", request.scope.as_str().to_string()),
            ("status", request.status.as_str().to_string()),
            ("page", request.page.to_string()),
        ];
        if let Some(inbox_id) = request.inbox_id {
            query.push(("inbox_id", inbox_id.to_string()));
        }
        let req = self.get(self.account_url("conversations")).query(&query);
        async move {
            let envelope: ConversationsEnvelope = read_json(req.send().await?).await?;
            Ok(ConversationPage {
                meta: envelope.data.meta.into(),
                conversations: envelope
                    .data
                    .payload
                    .into_iter()
                    .map(Conversation::from)
                    .collect(),
            })
        }
        .boxed()
    }

    fn fetch_conversation(
        &self,
        conversation_id: u64,
    ) -> BoxFuture<'static, Result<Conversation, FetchError>> {
        let req = self.get(self.account_url(&format!("conversations/{conversation_id}")));
        async move {
            let dto: ConversationDto = read_json(req.send().await?).await?;
            Ok(Conversation::from(dto))
        }
        .boxed()
    }

    fn fetch_notifications(
        &self,
        page: u32,
    ) -> BoxFuture<'static, Result<NotificationPage, FetchError>> {
        let req = self
            .get(self.account_url("notifications"))
            .query(&[("page", page.max(1).to_string())]);
        async move {
            let envelope: NotificationsEnvelope = read_json(req.send().await?).await?;
            Ok(NotificationPage {
                unread_count: envelope.data.meta.unread_count,
                notifications: envelope
                    .data
                    .payload
                    .into_iter()
                    .map(NotificationRecord::from)
                    .collect(),
            })
        }
        .boxed()
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or `max_attempts` is
/// reached, sleeping per `backoff` between tries.
pub async fn with_retry<T, F>(
    max_attempts: u32,
    mut backoff: Backoff,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> BoxFuture<'static, Result<T, FetchError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff.next_delay();
                tracing::warn!(attempt, max_attempts, ?delay, err = %e, "fetch failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
