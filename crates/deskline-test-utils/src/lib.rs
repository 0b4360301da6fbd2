use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug)]
pub struct CapturedRequest {
    pub method: String,
    /// Request target including the query string.
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub fn query_param(&self, name: &str) -> Option<&str> {
        let (_, query) = self.path.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }
}

/// Spawn a one-shot HTTP mock server that accepts a single request, captures it,
/// and responds with the given status line and body. Returns the base URL and a
/// receiver that yields the captured request.
pub fn spawn_one_shot_server(
    status_line: &str,
    response_body: &str,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    spawn_http_server(vec![(status_line.to_string(), response_body.to_string())])
}

/// Like [`spawn_one_shot_server`] but answers one request per scripted response, in order.
pub fn spawn_http_server(
    responses: Vec<(String, String)>,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("read mock server addr");
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for (status_line, body) in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let req = read_http_request(&mut stream);
            if tx.send(req).is_err() {
                return;
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    (format!("http://{addr}"), rx)
}

fn read_http_request(stream: &mut std::net::TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut header_end = None;
    let mut content_length = 0usize;

    loop {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).expect("read request bytes");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if header_end.is_none() {
            header_end = buf
                .windows(4)
                .position(|window| window == b"\r\n\r\n")
                .map(|idx| idx + 4);
            if let Some(end) = header_end {
                let headers = String::from_utf8_lossy(&buf[..end]);
                for line in headers.lines() {
                    if let Some((key, value)) = line.split_once(':') {
                        if key.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse::<usize>().unwrap_or(0);
                        }
                    }
                }
            }
        }
        if let Some(end) = header_end {
            if buf.len() >= end + content_length {
                break;
            }
        }
    }

    let end = header_end.expect("request headers must be present");
    let headers_raw = String::from_utf8_lossy(&buf[..end]);
    let mut lines = headers_raw.lines();
    let mut parts = lines.next().expect("request line").split_whitespace();
    let method = parts.next().expect("method").to_string();
    let path = parts.next().expect("path").to_string();
    let headers = lines
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let body = String::from_utf8(buf[end..end + content_length].to_vec()).expect("utf8 body");

    CapturedRequest {
        method,
        path,
        headers,
        body,
    }
}

/// Poll `f` until it holds or `timeout` passes.
pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

struct CableConn {
    tx: tokio_mpsc::UnboundedSender<Message>,
    identifier: Option<String>,
}

#[derive(Default)]
struct CableState {
    conns: HashMap<u64, CableConn>,
    next_conn_id: u64,
    received: Vec<Value>,
    confirmed: u32,
    reject: bool,
}

/// In-process ActionCable-style pub/sub server for channel tests.
///
/// Greets every connection with `welcome`, confirms (or rejects) `subscribe` commands,
/// pings once a second, and lets the test push events to subscribed connections.
pub struct FakeCable {
    url: String,
    state: Arc<Mutex<CableState>>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl FakeCable {
    pub fn start() -> Self {
        let state = Arc::new(Mutex::new(CableState::default()));
        let (url_tx, url_rx) = mpsc::channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state_for_thread = state.clone();
        let thread = thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("tokio runtime");
            rt.block_on(serve(state_for_thread, url_tx, shutdown_rx));
        });

        let url = url_rx.recv().expect("fake cable url");
        Self {
            url,
            state,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Answer future subscriptions with `reject_subscription`.
    pub fn set_reject(&self, reject: bool) {
        self.state.lock().unwrap().reject = reject;
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().unwrap().conns.len()
    }

    /// Total subscriptions confirmed since start.
    pub fn confirmed_count(&self) -> u32 {
        self.state.lock().unwrap().confirmed
    }

    /// Every JSON frame received from clients, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.state.lock().unwrap().received.clone()
    }

    /// Deliver `{event, data}` to every subscribed connection. Returns how many got it.
    pub fn push_event(&self, event: &str, data: Value) -> usize {
        let st = self.state.lock().unwrap();
        let mut delivered = 0;
        for conn in st.conns.values() {
            let Some(identifier) = conn.identifier.as_ref() else {
                continue;
            };
            let frame = json!({
                "identifier": identifier,
                "message": {"event": event, "data": data},
            });
            if conn.tx.send(Message::Text(frame.to_string().into())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Close every live connection from the server side.
    pub fn drop_connections(&self) {
        let st = self.state.lock().unwrap();
        for conn in st.conns.values() {
            let _ = conn.tx.send(Message::Close(None));
        }
    }
}

impl Drop for FakeCable {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve(
    state: Arc<Mutex<CableState>>,
    url_tx: mpsc::Sender<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake cable");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    url_tx.send(format!("ws://{addr}/cable")).expect("send url");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                let conns: Vec<_> = state.lock().unwrap().conns.values().map(|c| c.tx.clone()).collect();
                for tx in conns {
                    let _ = tx.send(Message::Close(None));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                break;
            }
            accept = listener.accept() => {
                let Ok((stream, _)) = accept else { continue };
                tokio::spawn(handle_conn(state.clone(), stream));
            }
        }
    }
}

async fn handle_conn(state: Arc<Mutex<CableState>>, stream: tokio::net::TcpStream) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = tokio_mpsc::unbounded_channel::<Message>();

    let conn_id = {
        let mut st = state.lock().unwrap();
        st.next_conn_id += 1;
        let id = st.next_conn_id;
        st.conns.insert(
            id,
            CableConn {
                tx: out_tx.clone(),
                identifier: None,
            },
        );
        id
    };

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    });
    let pinger_tx = out_tx.clone();
    let pinger = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let ping = json!({"type": "ping", "message": 0}).to_string();
            if pinger_tx.send(Message::Text(ping.into())).is_err() {
                break;
            }
        }
    });

    let _ = out_tx.send(Message::Text(json!({"type": "welcome"}).to_string().into()));

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => handle_command(&state, conn_id, text.as_str()),
            Message::Ping(p) => {
                let _ = out_tx.send(Message::Pong(p));
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.lock().unwrap().conns.remove(&conn_id);
    pinger.abort();
    writer.abort();
}

fn handle_command(state: &Arc<Mutex<CableState>>, conn_id: u64, text: &str) {
    let Ok(v) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let mut st = state.lock().unwrap();
    st.received.push(v.clone());
    if v.get("command").and_then(Value::as_str) != Some("subscribe") {
        return;
    }
    let identifier = v
        .get("identifier")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let reject = st.reject;
    if !reject {
        st.confirmed += 1;
    }
    let Some(conn) = st.conns.get_mut(&conn_id) else {
        return;
    };
    let kind = if reject {
        "reject_subscription"
    } else {
        conn.identifier = Some(identifier.clone());
        "confirm_subscription"
    };
    let reply = json!({"type": kind, "identifier": identifier});
    let _ = conn.tx.send(Message::Text(reply.to_string().into()));
}
