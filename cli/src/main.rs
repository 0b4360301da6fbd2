use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use deskline_core::backoff::Backoff;
use deskline_core::fetcher::{with_retry, HttpConversationSource, PageRequest};
use deskline_core::realtime::{
    cable_url_for, ChannelConfig, EventSink, RealtimeChannel, RealtimeEvent, SessionEvent,
    SessionSignal,
};
use deskline_core::reconciler::{Ingest, Reconciler, ViewFilter, DEFAULT_PENDING_CAPACITY};
use deskline_core::{
    Conversation, ConversationSource, ConversationStatus, Credential, NotificationRecord, Scope,
};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "deskline")]
#[command(about = "Helpdesk conversation sync CLI for poking at a live backend")]
struct Cli {
    /// REST base URL of the helpdesk installation
    #[arg(long, env = "DESKLINE_API_BASE_URL", default_value = "https://app.chatwoot.com")]
    base_url: String,

    #[arg(long, env = "DESKLINE_ACCOUNT_ID")]
    account_id: u64,

    /// Agent API access token
    #[arg(long, env = "DESKLINE_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Network attempts per request
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one page of conversations
    Page {
        #[arg(long, default_value = "mine")]
        scope: String,

        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value = "open")]
        status: String,

        #[arg(long)]
        inbox: Option<u64>,
    },

    /// Fetch a single conversation with its messages
    Conversation {
        #[arg(long)]
        id: u64,
    },

    /// List notifications
    Notifications {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },

    /// Subscribe to the pub/sub channel and print reconciled changes
    Watch {
        #[arg(long, env = "DESKLINE_PUBSUB_TOKEN", hide_env_values = true)]
        pubsub_token: String,

        /// Signed-in agent's user id
        #[arg(long)]
        user_id: u64,

        /// Websocket endpoint; derived from --base-url when omitted
        #[arg(long)]
        websocket_url: Option<String>,

        #[arg(long, default_value = "mine")]
        scope: String,

        /// Timeout in seconds (0 = run forever)
        #[arg(long, default_value_t = 0)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let source = HttpConversationSource::new(&cli.base_url, cli.account_id, cli.token.clone());

    match &cli.cmd {
        Command::Page {
            scope,
            page,
            status,
            inbox,
        } => cmd_page(&cli, &source, scope, *page, status, *inbox).await,
        Command::Conversation { id } => cmd_conversation(&cli, &source, *id).await,
        Command::Notifications { page } => cmd_notifications(&cli, &source, *page).await,
        Command::Watch {
            pubsub_token,
            user_id,
            websocket_url,
            scope,
            timeout,
        } => {
            let credential = Credential {
                pubsub_token: pubsub_token.clone(),
                account_id: cli.account_id,
                user_id: *user_id,
                api_access_token: cli.token.clone(),
                expires_at: None,
            };
            let url = websocket_url
                .clone()
                .unwrap_or_else(|| cable_url_for(&cli.base_url));
            cmd_watch(&cli, &source, credential, url, scope, *timeout).await
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn backoff() -> Backoff {
    Backoff::new(Duration::from_millis(500), Duration::from_secs(5))
}

fn parse_scope(s: &str) -> anyhow::Result<Scope> {
    s.parse::<Scope>().map_err(|e| anyhow!(e))
}

fn timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

fn conversation_json(c: &Conversation) -> serde_json::Value {
    json!({
        "id": c.id,
        "inbox_id": c.inbox_id,
        "assignee_id": c.assignee_id,
        "status": c.status.as_str(),
        "unread_count": c.unread_count,
        "last_activity_at": timestamp(c.last_activity_at),
        "contact": c.contact_name,
        "last_message": c.last_message().map(|m| m.content.as_str()),
        "message_count": c.messages.len(),
    })
}

fn notification_json(n: &NotificationRecord) -> serde_json::Value {
    json!({
        "id": n.id,
        "type": n.notification_type,
        "conversation_id": n.conversation_id,
        "read": n.read,
        "created_at": timestamp(n.created_at),
    })
}

fn print(v: serde_json::Value) {
    match serde_json::to_string_pretty(&v) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("json encode failed: {e}"),
    }
}

// ── Commands ────────────────────────────────────────────────────────────────

async fn cmd_page(
    cli: &Cli,
    source: &HttpConversationSource,
    scope: &str,
    page: u32,
    status: &str,
    inbox: Option<u64>,
) -> anyhow::Result<()> {
    let request = PageRequest {
        scope: parse_scope(scope)?,
        page,
        status: status
            .parse::<ConversationStatus>()
            .map_err(|e| anyhow!(e))?,
        inbox_id: inbox,
    };
    let result = with_retry(cli.attempts, backoff(), || source.fetch_page(request.clone()))
        .await
        .with_context(|| format!("fetch {} page {page}", request.scope))?;

    print(json!({
        "scope": request.scope.as_str(),
        "page": page,
        "counts": {
            "mine": result.meta.mine,
            "unassigned": result.meta.unassigned,
            "all": result.meta.all,
        },
        "last_page": result.is_terminal(),
        "conversations": result.conversations.iter().map(conversation_json).collect::<Vec<_>>(),
    }));
    Ok(())
}

async fn cmd_conversation(
    cli: &Cli,
    source: &HttpConversationSource,
    id: u64,
) -> anyhow::Result<()> {
    let conversation = with_retry(cli.attempts, backoff(), || source.fetch_conversation(id))
        .await
        .with_context(|| format!("fetch conversation {id}"))?;

    let mut out = conversation_json(&conversation);
    out["messages"] = conversation
        .messages
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "type": format!("{:?}", m.message_type),
                "status": format!("{:?}", m.status),
                "created_at": timestamp(m.created_at),
                "content": m.content,
            })
        })
        .collect();
    print(out);
    Ok(())
}

async fn cmd_notifications(
    cli: &Cli,
    source: &HttpConversationSource,
    page: u32,
) -> anyhow::Result<()> {
    let result = with_retry(cli.attempts, backoff(), || source.fetch_notifications(page))
        .await
        .context("fetch notifications")?;
    print(json!({
        "unread_count": result.unread_count,
        "notifications": result.notifications.iter().map(notification_json).collect::<Vec<_>>(),
    }));
    Ok(())
}

async fn cmd_watch(
    cli: &Cli,
    source: &HttpConversationSource,
    credential: Credential,
    url: String,
    scope: &str,
    timeout_sec: u64,
) -> anyhow::Result<()> {
    let scope = parse_scope(scope)?;
    let mut reconciler = Reconciler::new(credential.user_id, DEFAULT_PENDING_CAPACITY);
    let filter = ViewFilter::default();

    let first = with_retry(cli.attempts, backoff(), || {
        source.fetch_page(PageRequest::new(scope, 1))
    })
    .await
    .with_context(|| format!("fetch {scope} page 1"))?;
    reconciler.ingest_page(first.conversations);
    eprintln!(
        "loaded {} conversations in {scope}, watching {url}",
        reconciler.deduplicated_view(scope, &filter).len()
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SessionEvent>();
    let sink: EventSink = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    let mut channel = RealtimeChannel::new(
        tokio::runtime::Handle::current(),
        ChannelConfig::new(url),
        sink,
    );
    channel.connect(&credential).context("start realtime session")?;

    let deadline = if timeout_sec == 0 {
        None
    } else {
        Some(tokio::time::Instant::now() + Duration::from_secs(timeout_sec))
    };

    loop {
        let event = if let Some(dl) = deadline {
            let remaining = dl.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(e)) => e,
                Ok(None) | Err(_) => break,
            }
        } else {
            match rx.recv().await {
                Some(e) => e,
                None => break,
            }
        };

        match event.signal {
            SessionSignal::Status(state) => {
                print(json!({"type": "connection", "state": format!("{state:?}")}));
            }
            SessionSignal::Resubscribed => {
                // Anything published during the gap is only visible through a refetch.
                match source.fetch_page(PageRequest::new(scope, 1)).await {
                    Ok(page) => {
                        reconciler.ingest_page(page.conversations);
                        print(json!({"type": "resync", "scope": scope.as_str()}));
                    }
                    Err(e) => tracing::warn!(err = %e, "resync fetch failed"),
                }
            }
            SessionSignal::Event(e) => {
                handle_event(source, &mut reconciler, scope, &filter, e).await;
            }
        }
    }

    channel.disconnect();
    Ok(())
}

async fn handle_event(
    source: &HttpConversationSource,
    reconciler: &mut Reconciler,
    scope: Scope,
    filter: &ViewFilter,
    event: RealtimeEvent,
) {
    let tag = event.tag();
    match event {
        RealtimeEvent::TypingStatusChanged {
            conversation_id,
            user_name,
            is_typing,
            ..
        } => print(json!({
            "type": "typing",
            "conversation_id": conversation_id,
            "user": user_name,
            "typing": is_typing,
        })),
        RealtimeEvent::PresenceUpdated { online_user_ids } => {
            print(json!({"type": "presence", "online": online_user_ids}))
        }
        RealtimeEvent::NotificationPushed(n) => {
            let mut out = notification_json(&n);
            out["type"] = json!("notification");
            print(out);
        }
        other => {
            let conversation_id = other.conversation_id();
            let changed = match reconciler.ingest_event(other) {
                Ingest::Changed => true,
                Ingest::Unchanged => false,
                Ingest::Deferred { conversation_id } => {
                    match source.fetch_conversation(conversation_id).await {
                        Ok(c) => reconciler.ingest_conversation(c),
                        Err(e) => {
                            tracing::warn!(conversation_id, err = %e, "conversation fetch failed");
                            false
                        }
                    }
                }
            };
            if !changed {
                return;
            }
            let view = reconciler.deduplicated_view(scope, filter);
            let position = conversation_id.and_then(|id| view.iter().position(|c| c.id == id));
            print(json!({
                "type": tag,
                "conversation": conversation_id
                    .and_then(|id| reconciler.get(id))
                    .map(conversation_json),
                "position_in_scope": position,
                "scope_size": view.len(),
            }));
        }
    }
}
