mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use deskline_core::error::ChannelError;
use deskline_core::realtime::{
    ChannelConfig, EventSink, RealtimeChannel, RealtimeEvent, SessionEvent, SessionSignal,
};
use deskline_core::ConnectionState;
use deskline_test_utils::FakeCable;
use serde_json::json;
use support::{credential, wait_until, AGENT};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    channel: RealtimeChannel,
    events: Arc<Mutex<Vec<SessionEvent>>>,
    // Dropped last so the channel's tasks can still be aborted cleanly.
    _rt: tokio::runtime::Runtime,
}

impl Harness {
    fn new(url: &str) -> Self {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let events = Arc::new(Mutex::new(vec![]));
        let sink_events = events.clone();
        let sink: EventSink = Arc::new(move |e| sink_events.lock().unwrap().push(e));
        let mut config = ChannelConfig::new(url);
        config.reconnect_base = Duration::from_millis(20);
        config.reconnect_max = Duration::from_millis(100);
        config.stale_after = Duration::from_secs(3);
        Self {
            channel: RealtimeChannel::new(rt.handle().clone(), config, sink),
            events,
            _rt: rt,
        }
    }

    fn signals(&self, session_id: u64) -> Vec<SessionSignal> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.session_id == session_id)
            .map(|e| e.signal.clone())
            .collect()
    }

    fn count(&self, session_id: u64, f: impl Fn(&SessionSignal) -> bool) -> usize {
        self.signals(session_id).iter().filter(|s| f(s)).count()
    }
}

fn is_open(s: &SessionSignal) -> bool {
    *s == SessionSignal::Status(ConnectionState::Open)
}

#[test]
fn subscribes_and_delivers_typed_events() {
    let cable = FakeCable::start();
    let mut h = Harness::new(cable.url());
    let id = h.channel.connect(&credential(AGENT)).unwrap();
    wait_until("subscription open", WAIT, || h.count(id, is_open) == 1);

    let subscribe = cable
        .received()
        .into_iter()
        .find(|f| f["command"] == "subscribe")
        .expect("subscribe command");
    let identifier: serde_json::Value =
        serde_json::from_str(subscribe["identifier"].as_str().unwrap()).unwrap();
    assert_eq!(identifier["channel"], "RoomChannel");
    assert_eq!(identifier["pubsub_token"], format!("pubsub-{AGENT}"));
    assert_eq!(identifier["user_id"], AGENT);

    assert_eq!(
        cable.push_event(
            "message.created",
            json!({"id": 11, "conversation_id": 3, "content": "hello", "created_at": 10}),
        ),
        1
    );
    cable.push_event("contact.merged", json!({}));
    wait_until("message event", WAIT, || {
        h.count(id, |s| matches!(s, SessionSignal::Event(_))) == 1
    });
    let event = h
        .signals(id)
        .into_iter()
        .find_map(|s| match s {
            SessionSignal::Event(e) => Some(e),
            _ => None,
        })
        .unwrap();
    let RealtimeEvent::MessageCreated(message) = event else {
        panic!("unexpected event {event:?}");
    };
    assert_eq!((message.id, message.conversation_id), (11, 3));
}

#[test]
fn reconnects_after_drop_and_signals_resubscribe() {
    let cable = FakeCable::start();
    let mut h = Harness::new(cable.url());
    let id = h.channel.connect(&credential(AGENT)).unwrap();
    wait_until("first subscription", WAIT, || h.count(id, is_open) == 1);
    assert_eq!(h.count(id, |s| *s == SessionSignal::Resubscribed), 0);

    cable.drop_connections();
    wait_until("closed", WAIT, || {
        h.count(id, |s| *s == SessionSignal::Status(ConnectionState::Closed)) >= 1
    });
    wait_until("resubscribed", WAIT, || {
        h.count(id, |s| *s == SessionSignal::Resubscribed) == 1
    });
    assert_eq!(cable.confirmed_count(), 2);
    assert_eq!(h.count(id, is_open), 2);
}

#[test]
fn connecting_again_tears_down_the_previous_session() {
    let cable = FakeCable::start();
    let mut h = Harness::new(cable.url());
    let first = h.channel.connect(&credential(AGENT)).unwrap();
    wait_until("first open", WAIT, || h.count(first, is_open) == 1);

    let second = h.channel.connect(&credential(AGENT)).unwrap();
    assert_ne!(first, second);
    assert_eq!(h.channel.active_session(), Some(second));
    wait_until("second open", WAIT, || h.count(second, is_open) == 1);
    wait_until("one socket left", WAIT, || cable.connection_count() == 1);

    let before = h.signals(first).len();
    cable.push_event("message.created", json!({"id": 1, "conversation_id": 1}));
    wait_until("event on new session", WAIT, || {
        h.count(second, |s| matches!(s, SessionSignal::Event(_))) == 1
    });
    assert_eq!(h.signals(first).len(), before);
}

#[test]
fn disconnect_closes_the_socket() {
    let cable = FakeCable::start();
    let mut h = Harness::new(cable.url());
    let id = h.channel.connect(&credential(AGENT)).unwrap();
    wait_until("open", WAIT, || h.count(id, is_open) == 1);
    assert_eq!(cable.connection_count(), 1);

    h.channel.disconnect();
    assert_eq!(h.channel.active_session(), None);
    wait_until("socket closed", WAIT, || cable.connection_count() == 0);
}

#[test]
fn rejected_subscription_is_fatal() {
    let cable = FakeCable::start();
    cable.set_reject(true);
    let mut h = Harness::new(cable.url());
    let id = h.channel.connect(&credential(AGENT)).unwrap();

    wait_until("error status", WAIT, || {
        h.count(id, |s| {
            matches!(s, SessionSignal::Status(ConnectionState::Error { .. }))
        }) == 1
    });
    std::thread::sleep(Duration::from_millis(300));
    // No reconnect attempts after an auth failure.
    let subscribes = cable
        .received()
        .iter()
        .filter(|f| f["command"] == "subscribe")
        .count();
    assert_eq!(subscribes, 1);
    assert_eq!(h.count(id, is_open), 0);
}

#[test]
fn unusable_credential_fails_before_connecting() {
    let cable = FakeCable::start();
    let mut h = Harness::new(cable.url());
    let mut c = credential(AGENT);
    c.pubsub_token = String::new();
    assert!(matches!(h.channel.connect(&c), Err(ChannelError::Auth(_))));
    assert_eq!(h.channel.active_session(), None);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(cable.connection_count(), 0);
}

#[test]
fn unreachable_server_keeps_retrying() {
    // Bind then drop to get a port with nothing listening.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mut h = Harness::new(&format!("ws://127.0.0.1:{port}/cable"));
    let id = h.channel.connect(&credential(AGENT)).unwrap();
    wait_until("several attempts", WAIT, || {
        h.count(id, |s| *s == SessionSignal::Status(ConnectionState::Connecting)) >= 3
    });
    assert_eq!(
        h.count(id, |s| matches!(s, SessionSignal::Status(ConnectionState::Error { .. }))),
        0
    );
}
