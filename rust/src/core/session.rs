// Session lifecycle: credential in, realtime channel + REST source up, first pages out.

use super::*;

use crate::error::ChannelError;
use crate::fetcher::HttpConversationSource;
use crate::state::now_seconds;

impl AppCore {
    pub(super) fn start_session(&mut self, credential: Credential) -> Result<(), ChannelError> {
        // Tear down any existing session first.
        self.stop_session();

        credential.validate(now_seconds())?;
        tracing::info!(
            account_id = credential.account_id,
            user_id = credential.user_id,
            "start_session"
        );

        if self.reconciler.user_id() != credential.user_id {
            let previous = self.reconciler.user_id();
            self.reconciler.reset(credential.user_id);
            if previous != 0 {
                // A different agent: their notifications are not ours.
                if let Some(store) = self.notifications.as_ref() {
                    if let Err(e) = store.clear() {
                        tracing::warn!(%e, "failed to clear notification db");
                    }
                }
                self.refresh_unread_notifications();
            }
        }

        let source: Option<Arc<dyn ConversationSource>> = match &self.source_override {
            Some(source) => Some(source.clone()),
            None if self.network_enabled() => Some(Arc::new(HttpConversationSource::new(
                &self.config.api_base_url(),
                credential.account_id,
                credential.api_access_token.clone(),
            ))),
            None => None,
        };

        if self.network_enabled() {
            let session_id = self.channel.connect(&credential)?;
            tracing::info!(session_id, "realtime connect scheduled");
            self.state.connection = ConnectionState::Connecting;
        } else {
            self.state.connection = ConnectionState::Closed;
        }

        self.session = Some(Session { credential, source });

        let ticket = self.pagination.restart();
        self.spawn_page_fetch(Some(ticket), ticket.page);
        self.spawn_notifications_fetch();
        self.emit_state();
        Ok(())
    }

    pub(super) fn stop_session(&mut self) {
        // Invalidate in-flight fetches; their results will carry the old epoch.
        self.epoch = self.epoch.wrapping_add(1);
        self.refreshes_in_flight = 0;
        self.conversation_fetches.clear();

        self.channel.disconnect();
        if self.session.take().is_some() {
            tracing::info!("stop_session");
        }
        self.typing.clear();
        self.online.clear();
        self.state.connection = ConnectionState::Closed;
    }
}
