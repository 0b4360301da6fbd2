//! Realtime pub/sub channel.
//!
//! One [`RealtimeChannel`] owns at most one live [`SessionHandle`]. Each session runs a
//! reconnecting websocket loop on the caller's tokio runtime and reports back through an
//! [`EventSink`]. Every [`SessionEvent`] carries the id of the session that produced it so
//! consumers can discard stragglers from a superseded session.
//!
//! Transport failures never surface as errors: the loop backs off and reconnects for as
//! long as the handle is alive. A rejected credential ends the session with
//! [`ConnectionState::Error`]. Events published while a connection was down are lost, so
//! the loop emits [`SessionSignal::Resubscribed`] after every subscription that follows the
//! first one; consumers should refetch to resynchronize.

pub mod protocol;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::backoff::Backoff;
use crate::error::ChannelError;
use crate::state::{now_seconds, ConnectionState, Credential};

pub use protocol::{RealtimeEvent, ServerFrame};

pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    Status(ConnectionState),
    /// Subscription re-established after a gap; events may have been missed.
    Resubscribed,
    Event(RealtimeEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub signal: SessionSignal,
}

/// Must not block: it is called from the socket task for every frame.
pub type EventSink = Arc<dyn Fn(SessionEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Force a reconnect when no frame (pings included) arrives for this long.
    pub stale_after: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            stale_after: Duration::from_secs(12),
        }
    }
}

/// The pub/sub endpoint served next to a REST base URL (`https://x` -> `wss://x/cable`).
pub fn cable_url_for(api_base_url: &str) -> String {
    let base = api_base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/cable")
}

/// Scoped ownership of one live session. Dropping it tears the session down.
pub struct SessionHandle {
    id: SessionId,
    alive: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn disconnect(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        // Flip first so nothing the task is still doing reaches the sink.
        self.alive.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::info!(session_id = self.id, "realtime session torn down");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

pub struct RealtimeChannel {
    runtime: Handle,
    config: ChannelConfig,
    sink: EventSink,
    active: Option<SessionHandle>,
    next_id: SessionId,
}

impl RealtimeChannel {
    pub fn new(runtime: Handle, config: ChannelConfig, sink: EventSink) -> Self {
        Self {
            runtime,
            config,
            sink,
            active: None,
            next_id: 0,
        }
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.active.as_ref().map(SessionHandle::id)
    }

    /// Start a new session, tearing down any previous one first.
    ///
    /// Fails only when the credential itself is unusable; transport problems are retried
    /// inside the session.
    pub fn connect(&mut self, credential: &Credential) -> Result<SessionId, ChannelError> {
        self.disconnect();
        credential.validate(now_seconds())?;

        self.next_id += 1;
        let id = self.next_id;
        let alive = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let emitter = Emitter {
            session_id: id,
            alive: alive.clone(),
            sink: self.sink.clone(),
        };
        let task = self.runtime.spawn(run_session(
            credential.clone(),
            self.config.clone(),
            emitter,
            shutdown_rx,
        ));
        tracing::info!(
            session_id = id,
            account_id = credential.account_id,
            user_id = credential.user_id,
            url = %self.config.url,
            "realtime session started"
        );

        self.active = Some(SessionHandle {
            id,
            alive,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        });
        Ok(id)
    }

    pub fn disconnect(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.disconnect();
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[derive(Clone)]
struct Emitter {
    session_id: SessionId,
    alive: Arc<AtomicBool>,
    sink: EventSink,
}

impl Emitter {
    fn emit(&self, signal: SessionSignal) {
        if self.alive.load(Ordering::SeqCst) {
            (self.sink)(SessionEvent {
                session_id: self.session_id,
                signal,
            });
        }
    }
}

async fn run_session(
    credential: Credential,
    config: ChannelConfig,
    emitter: Emitter,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut backoff = Backoff::new(config.reconnect_base, config.reconnect_max);
    let mut subscribed_before = false;

    loop {
        emitter.emit(SessionSignal::Status(ConnectionState::Connecting));

        let outcome = tokio::select! {
            _ = &mut shutdown => return,
            r = drive_connection(&credential, &config, &emitter, &mut backoff, &mut subscribed_before) => r,
        };

        match outcome {
            Err(ChannelError::Auth(reason)) => {
                tracing::warn!(session_id = emitter.session_id, %reason, "realtime session rejected");
                emitter.emit(SessionSignal::Status(ConnectionState::Error { reason }));
                return;
            }
            Err(e) => {
                tracing::warn!(session_id = emitter.session_id, err = %e, "realtime connection lost");
            }
            Ok(()) => {
                tracing::info!(session_id = emitter.session_id, "realtime connection closed by server");
            }
        }
        emitter.emit(SessionSignal::Status(ConnectionState::Closed));

        let delay = backoff.next_delay();
        tracing::debug!(session_id = emitter.session_id, ?delay, attempt = backoff.attempt(), "realtime reconnect scheduled");
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn drive_connection(
    credential: &Credential,
    config: &ChannelConfig,
    emitter: &Emitter,
    backoff: &mut Backoff,
    subscribed_before: &mut bool,
) -> Result<(), ChannelError> {
    let (ws, _) = tokio_tungstenite::connect_async(config.url.as_str())
        .await
        .map_err(|e| ChannelError::Connect(e.to_string()))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        let msg = match tokio::time::timeout(config.stale_after, ws_rx.next()).await {
            Err(_) => {
                return Err(ChannelError::Connect(format!(
                    "no frames for {:?}",
                    config.stale_after
                )))
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(ChannelError::Connect(e.to_string())),
            Ok(Some(Ok(m))) => m,
        };

        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Ping(payload) => {
                ws_tx
                    .send(WsMessage::Pong(payload))
                    .await
                    .map_err(|e| ChannelError::Connect(e.to_string()))?;
                continue;
            }
            WsMessage::Close(_) => return Ok(()),
            _ => continue,
        };

        let frame = match protocol::decode_frame(text.as_str()) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(session_id = emitter.session_id, err = %e, "dropping realtime frame");
                continue;
            }
        };
        if frame.is_unauthorized() {
            return Err(ChannelError::Auth("subscription rejected by server".into()));
        }

        match frame {
            ServerFrame::Welcome => {
                ws_tx
                    .send(WsMessage::Text(protocol::subscribe_command(credential).into()))
                    .await
                    .map_err(|e| ChannelError::Connect(e.to_string()))?;
            }
            ServerFrame::ConfirmSubscription => {
                backoff.reset();
                emitter.emit(SessionSignal::Status(ConnectionState::Open));
                if *subscribed_before {
                    emitter.emit(SessionSignal::Resubscribed);
                }
                *subscribed_before = true;
            }
            ServerFrame::Disconnect { reason, .. } => {
                tracing::info!(session_id = emitter.session_id, ?reason, "server requested disconnect");
                return Ok(());
            }
            ServerFrame::Event(event) => {
                tracing::debug!(
                    session_id = emitter.session_id,
                    event = event.tag(),
                    conversation_id = ?event.conversation_id(),
                    "realtime event"
                );
                emitter.emit(SessionSignal::Event(event));
            }
            ServerFrame::Ping | ServerFrame::Ignored | ServerFrame::RejectSubscription => {}
        }
    }
}
