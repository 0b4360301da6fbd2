mod config;
mod session;
mod sync;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::fetcher::ConversationSource;
use crate::notifications::NotificationStore;
use crate::pagination::Pagination;
use crate::realtime::{EventSink, RealtimeChannel, RealtimeEvent, SessionSignal};
use crate::reconciler::{Ingest, Reconciler, ViewFilter};
use crate::state::{AppState, ConnectionState, Credential, TypingEntry};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

struct Session {
    credential: Credential,
    // `None` when networking is disabled and nothing was injected.
    source: Option<Arc<dyn ConversationSource>>,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,

    // Declared before `runtime` so live sessions are torn down first.
    channel: RealtimeChannel,
    runtime: tokio::runtime::Runtime,

    source_override: Option<Arc<dyn ConversationSource>>,
    session: Option<Session>,
    // Bumped on every activation change; async results from older epochs are dropped.
    epoch: u64,

    reconciler: Reconciler,
    pagination: Pagination,
    refreshes_in_flight: u32,
    conversation_fetches: HashSet<u64>,

    // conversation_id -> user_id -> display name
    typing: BTreeMap<u64, BTreeMap<u64, String>>,
    online: BTreeSet<u64>,
    notifications: Option<NotificationStore>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        source_override: Option<Arc<dyn ConversationSource>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let mut state = AppState::empty();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let sink_tx = core_sender.clone();
        let sink: EventSink = Arc::new(move |event| {
            let _ = sink_tx.send(CoreMsg::Internal(Box::new(InternalEvent::Session(event))));
        });
        let channel = RealtimeChannel::new(runtime.handle().clone(), config.channel_config(), sink);

        let notifications = match NotificationStore::open(&data_dir) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(err = format!("{e:#}"), "failed to open notification db, keeping notifications in memory");
                NotificationStore::open_in_memory().ok()
            }
        };
        if let Some(store) = notifications.as_ref() {
            state.unread_notifications = store.unread_count().unwrap_or(0);
        }

        let this = Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            reconciler: Reconciler::new(0, config.pending_event_capacity()),
            config,
            channel,
            runtime,
            source_override,
            session: None,
            epoch: 0,
            pagination: Pagination::default(),
            refreshes_in_flight: 0,
            conversation_fetches: HashSet::new(),
            typing: BTreeMap::new(),
            online: BTreeSet::new(),
            notifications,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn refresh_view(&mut self) {
        let filter = ViewFilter {
            status: Some(self.state.status_filter),
            inbox_id: self.state.inbox_filter,
        };
        self.state.conversations = self.reconciler.deduplicated_view(self.state.scope, &filter);
        self.state.is_fetching = self.session.is_some()
            && (self.pagination.is_fetching() || self.refreshes_in_flight > 0);
        self.state.all_loaded = self.pagination.all_loaded();
        self.state.typing = self
            .typing
            .iter()
            .filter(|(_, users)| !users.is_empty())
            .map(|(conversation_id, users)| TypingEntry {
                conversation_id: *conversation_id,
                user_names: users.values().cloned().collect(),
            })
            .collect();
        self.state.online_agents = self.online.iter().copied().collect();
    }

    fn emit_state(&mut self) {
        self.refresh_view();
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Stays in state until the UI clears it, so a snapshot resync still shows it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    fn refresh_unread_notifications(&mut self) {
        if let Some(store) = self.notifications.as_ref() {
            match store.unread_count() {
                Ok(n) => self.state.unread_notifications = n,
                Err(e) => tracing::warn!(%e, "failed to count unread notifications"),
            }
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: `Activate` carries tokens.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Session
            AppAction::Activate { credential } => {
                if let Err(e) = self.start_session(credential) {
                    self.state.connection = ConnectionState::Error {
                        reason: e.to_string(),
                    };
                    self.toast(format!("Sign-in failed: {e}"));
                }
            }
            AppAction::Deactivate => {
                self.stop_session();
                self.emit_state();
            }

            // List
            AppAction::SelectScope { scope } => {
                if let Some(ticket) = self.pagination.select_scope(scope) {
                    tracing::info!(%scope, "scope selected");
                    self.state.scope = scope;
                    self.spawn_page_fetch(Some(ticket), ticket.page);
                    // Cached conversations show immediately while page 1 loads.
                    self.emit_state();
                }
            }
            AppAction::SetStatusFilter { status } => {
                if status != self.state.status_filter {
                    self.state.status_filter = status;
                    self.restart_pagination();
                }
            }
            AppAction::SetInboxFilter { inbox_id } => {
                if inbox_id != self.state.inbox_filter {
                    self.state.inbox_filter = inbox_id;
                    self.restart_pagination();
                }
            }
            AppAction::ScrollBegan => self.pagination.arm(),
            AppAction::ReachedEnd => {
                if self.session.is_none() {
                    return;
                }
                if let Some(ticket) = self.pagination.request_advance() {
                    tracing::debug!(scope = %ticket.scope, page = ticket.page, "advancing page");
                    self.spawn_page_fetch(Some(ticket), ticket.page);
                    self.emit_state();
                }
            }
            AppAction::Refresh => {
                if self.session.is_some() {
                    self.spawn_page_fetch(None, 1);
                    self.emit_state();
                }
            }

            // Notifications
            AppAction::MarkNotificationRead { notification_id } => {
                let Some(store) = self.notifications.as_ref() else {
                    return;
                };
                match store.mark_read(notification_id) {
                    Ok(true) => {
                        self.refresh_unread_notifications();
                        self.emit_state();
                    }
                    Ok(false) => tracing::debug!(notification_id, "unknown notification"),
                    Err(e) => tracing::warn!(%e, notification_id, "failed to mark notification read"),
                }
            }

            // UI
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }

            // Lifecycle
            AppAction::Foregrounded => {
                if self.session.is_some() {
                    self.resync();
                    self.emit_state();
                }
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::Session(event) => {
                if self.channel.active_session() != Some(event.session_id) {
                    tracing::debug!(session_id = event.session_id, "dropping event from stale session");
                    return;
                }
                match event.signal {
                    SessionSignal::Status(connection) => self.handle_connection_state(connection),
                    SessionSignal::Resubscribed => {
                        tracing::info!(session_id = event.session_id, "resubscribed, resyncing");
                        self.resync();
                        self.emit_state();
                    }
                    SessionSignal::Event(e) => self.handle_realtime_event(e),
                }
            }
            InternalEvent::PageFetched {
                epoch,
                ticket,
                request,
                result,
            } => self.handle_page_fetched(epoch, ticket, request, result),
            InternalEvent::ConversationFetched {
                epoch,
                conversation_id,
                result,
            } => self.handle_conversation_fetched(epoch, conversation_id, result),
            InternalEvent::NotificationsFetched { epoch, result } => {
                self.handle_notifications_fetched(epoch, result)
            }
        }
    }

    fn handle_connection_state(&mut self, connection: ConnectionState) {
        if connection == self.state.connection {
            return;
        }
        tracing::info!(?connection, "realtime connection state");
        let rejected = match &connection {
            ConnectionState::Error { reason } => Some(reason.clone()),
            _ => None,
        };
        if connection != ConnectionState::Open {
            // Nobody is typing as far as we can tell once the stream is gone.
            self.typing.clear();
        }
        self.state.connection = connection;
        match rejected {
            Some(reason) => self.toast(format!("Live updates stopped: {reason}")),
            None => self.emit_state(),
        }
    }

    fn handle_realtime_event(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::TypingStatusChanged {
                conversation_id,
                user_id,
                user_name,
                is_typing,
            } => {
                if self.session_user_id() == Some(user_id) {
                    return;
                }
                let users = self.typing.entry(conversation_id).or_default();
                let changed = if is_typing {
                    users.insert(user_id, user_name).is_none()
                } else {
                    users.remove(&user_id).is_some()
                };
                if users.is_empty() {
                    self.typing.remove(&conversation_id);
                }
                if changed {
                    self.emit_state();
                }
            }
            RealtimeEvent::PresenceUpdated { online_user_ids } => {
                let online: BTreeSet<u64> = online_user_ids.into_iter().collect();
                if online != self.online {
                    self.online = online;
                    self.emit_state();
                }
            }
            RealtimeEvent::NotificationPushed(record) => {
                let Some(store) = self.notifications.as_ref() else {
                    return;
                };
                if let Err(e) = store.upsert(&record) {
                    tracing::warn!(%e, notification_id = record.id, "failed to store notification");
                    return;
                }
                self.refresh_unread_notifications();
                self.emit_state();
            }
            other => match self.reconciler.ingest_event(other) {
                Ingest::Changed => self.emit_state(),
                Ingest::Unchanged => {}
                Ingest::Deferred { conversation_id } => {
                    self.spawn_conversation_fetch(conversation_id)
                }
            },
        }
    }

    fn session_user_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.credential.user_id)
    }
}
