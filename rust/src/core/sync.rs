// Fetch side effects. Work runs on the runtime; results come back as internal events
// tagged with the epoch that spawned them.

use super::*;

use crate::error::FetchError;
use crate::fetcher::{with_retry, ConversationPage, NotificationPage, PageRequest};
use crate::pagination::{PageOutcome, PageTicket};
use crate::state::Conversation;

impl AppCore {
    fn source(&self) -> Option<Arc<dyn ConversationSource>> {
        self.session.as_ref().and_then(|s| s.source.clone())
    }

    fn send_internal(tx: &Sender<CoreMsg>, event: InternalEvent) {
        let _ = tx.send(CoreMsg::Internal(Box::new(event)));
    }

    /// `ticket` is `None` for refreshes that must not move the cursor.
    pub(super) fn spawn_page_fetch(&mut self, ticket: Option<PageTicket>, page: u32) {
        let Some(source) = self.source() else {
            if let Some(ticket) = ticket {
                self.pagination.resolve(ticket, PageOutcome::Failed);
            }
            return;
        };
        let request = PageRequest {
            scope: ticket.map(|t| t.scope).unwrap_or(self.state.scope),
            page,
            status: self.state.status_filter,
            inbox_id: self.state.inbox_filter,
        };
        if ticket.is_none() {
            self.refreshes_in_flight += 1;
        }
        tracing::debug!(scope = %request.scope, page, tracked = ticket.is_some(), "fetch page");

        let tx = self.core_sender.clone();
        let epoch = self.epoch;
        let attempts = self.config.max_fetch_attempts();
        let backoff = self.config.fetch_backoff();
        self.runtime.spawn(async move {
            let req = request.clone();
            let result = with_retry(attempts, backoff, || source.fetch_page(req.clone())).await;
            Self::send_internal(
                &tx,
                InternalEvent::PageFetched {
                    epoch,
                    ticket,
                    request,
                    result,
                },
            );
        });
    }

    /// Fetch a conversation referenced by an event we could not place. One fetch per id.
    pub(super) fn spawn_conversation_fetch(&mut self, conversation_id: u64) {
        let Some(source) = self.source() else {
            return;
        };
        if !self.conversation_fetches.insert(conversation_id) {
            return;
        }
        tracing::debug!(conversation_id, "fetch unknown conversation");

        let tx = self.core_sender.clone();
        let epoch = self.epoch;
        let attempts = self.config.max_fetch_attempts();
        let backoff = self.config.fetch_backoff();
        self.runtime.spawn(async move {
            let result = with_retry(attempts, backoff, || {
                source.fetch_conversation(conversation_id)
            })
            .await;
            Self::send_internal(
                &tx,
                InternalEvent::ConversationFetched {
                    epoch,
                    conversation_id,
                    result,
                },
            );
        });
    }

    pub(super) fn spawn_notifications_fetch(&mut self) {
        let Some(source) = self.source() else {
            return;
        };
        let tx = self.core_sender.clone();
        let epoch = self.epoch;
        let attempts = self.config.max_fetch_attempts();
        let backoff = self.config.fetch_backoff();
        self.runtime.spawn(async move {
            let result = with_retry(attempts, backoff, || source.fetch_notifications(1)).await;
            Self::send_internal(&tx, InternalEvent::NotificationsFetched { epoch, result });
        });
    }

    /// New pagination session for the current scope after a filter change.
    pub(super) fn restart_pagination(&mut self) {
        let ticket = self.pagination.restart();
        self.spawn_page_fetch(Some(ticket), ticket.page);
        self.emit_state();
    }

    /// Catch up after a gap in live delivery. Does not move the cursor.
    pub(super) fn resync(&mut self) {
        for page in self.pagination.resync_pages() {
            self.spawn_page_fetch(None, page);
        }
    }

    pub(super) fn handle_page_fetched(
        &mut self,
        epoch: u64,
        ticket: Option<PageTicket>,
        request: PageRequest,
        result: Result<ConversationPage, FetchError>,
    ) {
        if epoch != self.epoch {
            tracing::debug!(page = request.page, "dropping page from previous session");
            return;
        }
        if ticket.is_none() {
            self.refreshes_in_flight = self.refreshes_in_flight.saturating_sub(1);
        }

        match result {
            Ok(page) => {
                let empty = page.is_terminal();
                if let Some(ticket) = ticket {
                    if !self.pagination.resolve(ticket, PageOutcome::Loaded { empty }) {
                        tracing::debug!(scope = %ticket.scope, page = ticket.page, "stale page ticket");
                    }
                }
                tracing::info!(
                    scope = %request.scope,
                    page = request.page,
                    count = page.conversations.len(),
                    "page loaded"
                );
                // Conversations from a superseded scope session are still real data.
                self.state.counts = page.meta;
                self.reconciler.ingest_page(page.conversations);
                self.emit_state();
            }
            Err(e) => {
                if let Some(ticket) = ticket {
                    self.pagination.resolve(ticket, PageOutcome::Failed);
                }
                tracing::warn!(scope = %request.scope, page = request.page, err = %e, "page fetch failed");
                let message = match e {
                    FetchError::Auth(_) => "Session expired, sign in again".to_string(),
                    other => format!("Couldn't load conversations: {other}"),
                };
                self.toast(message);
            }
        }
    }

    pub(super) fn handle_conversation_fetched(
        &mut self,
        epoch: u64,
        conversation_id: u64,
        result: Result<Conversation, FetchError>,
    ) {
        if epoch != self.epoch {
            return;
        }
        self.conversation_fetches.remove(&conversation_id);
        match result {
            Ok(conversation) => {
                if self.reconciler.ingest_conversation(conversation) {
                    self.emit_state();
                }
            }
            Err(e) => {
                // Parked events stay queued and replay whenever the conversation shows up.
                tracing::warn!(
                    conversation_id,
                    pending = self.reconciler.pending_for(conversation_id),
                    err = %e,
                    "conversation fetch failed"
                );
            }
        }
    }

    pub(super) fn handle_notifications_fetched(
        &mut self,
        epoch: u64,
        result: Result<NotificationPage, FetchError>,
    ) {
        if epoch != self.epoch {
            return;
        }
        let page = match result {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(err = %e, "notifications fetch failed");
                return;
            }
        };
        let Some(store) = self.notifications.as_ref() else {
            return;
        };
        for record in &page.notifications {
            if let Err(e) = store.upsert(record) {
                tracing::warn!(%e, notification_id = record.id, "failed to store notification");
            }
        }
        tracing::info!(
            count = page.notifications.len(),
            server_unread = page.unread_count,
            "notifications loaded"
        );
        self.refresh_unread_notifications();
        self.emit_state();
    }
}
