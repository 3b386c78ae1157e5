//! In-process pubsub hub for integration tests.
//!
//! Accepted sockets are handed to the test as they arrive so each test plays
//! the server side of the protocol by hand.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use reliable_pubsub::ClientEvent;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const TOKEN: &str = "secret";
pub const BEARER: &str = "let-me-in";

const STEP: Duration = Duration::from_secs(5);

/// One accepted websocket and how it was requested.
pub struct Accepted {
    pub query: HashMap<String, String>,
    /// Raw `Sec-WebSocket-Protocol` request header.
    pub offered_protocols: Option<String>,
    pub socket: WebSocket,
}

#[derive(Clone)]
struct HubState {
    addr: SocketAddr,
    accepted: mpsc::UnboundedSender<Accepted>,
    refusals: Arc<Refusals>,
}

/// Resume handshakes still to refuse, and how many were refused.
#[derive(Default)]
struct Refusals {
    budget: AtomicUsize,
    refused: AtomicUsize,
}

pub struct MockHub {
    pub addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<Accepted>,
    refusals: Arc<Refusals>,
}

impl MockHub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = mpsc::unbounded_channel();
        let refusals = Arc::new(Refusals::default());

        let app = Router::new()
            .route("/negotiate", get(negotiate))
            .route("/client", get(upgrade))
            .route("/chat", get(upgrade))
            .with_state(HubState {
                addr,
                accepted: tx,
                refusals: Arc::clone(&refusals),
            });

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            accepted: rx,
            refusals,
        }
    }

    /// Answer the next `count` resume handshakes with 503.
    #[allow(dead_code)]
    pub fn refuse_resumes(&self, count: usize) {
        self.refusals.budget.store(count, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn refused_resumes(&self) -> usize {
        self.refusals.refused.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn negotiate_url(&self) -> String {
        format!("http://{}/negotiate", self.addr)
    }

    #[allow(dead_code)]
    pub fn chat_url(&self) -> String {
        format!("ws://{}/chat", self.addr)
    }

    /// Next accepted socket.
    pub async fn accept(&mut self) -> Accepted {
        tokio::time::timeout(STEP, self.accepted.recv())
            .await
            .expect("client should connect")
            .expect("hub running")
    }

    /// Assert no socket arrives within `window`.
    #[allow(dead_code)]
    pub async fn expect_no_connection(&mut self, window: Duration) {
        let next = tokio::time::timeout(window, self.accepted.recv()).await;
        assert!(next.is_err(), "client should not reconnect");
    }
}

impl Refusals {
    fn take(&self) -> bool {
        let taken = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            self.refused.fetch_add(1, Ordering::SeqCst);
        }
        taken
    }
}

async fn negotiate(State(hub): State<HubState>, headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {BEARER}"));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "bearer token required").into_response();
    }
    axum::Json(json!({
        "baseUrl": format!("ws://{}/client", hub.addr),
        "token": TOKEN,
    }))
    .into_response()
}

async fn upgrade(
    State(hub): State<HubState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if query.contains_key("awps_connection_id") && hub.refusals.take() {
        return (StatusCode::SERVICE_UNAVAILABLE, "resume refused").into_response();
    }

    let offered_protocols = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);

    ws.protocols([
        "json.reliable.webpubsub.azure.v1",
        "protobuf.reliable.webpubsub.azure.v1",
        "realtime.looki.v1",
    ])
    .on_upgrade(move |socket| async move {
        let _ = hub.accepted.send(Accepted {
            query,
            offered_protocols,
            socket,
        });
    })
}

// =============================================================================
// SERVER-SIDE HELPERS
// =============================================================================

pub async fn send_json(socket: &mut WebSocket, value: &Value) {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("server send");
}

/// Next text frame from the client, parsed as JSON.
pub async fn recv_json(socket: &mut WebSocket) -> Value {
    loop {
        let message = tokio::time::timeout(STEP, socket.recv())
            .await
            .expect("client frame in time")
            .expect("socket open")
            .expect("socket healthy");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json frame"),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected client frame: {other:?}"),
        }
    }
}

/// Wait for the client's close frame and return its code.
#[allow(dead_code)]
pub async fn recv_close_code(socket: &mut WebSocket) -> Option<u16> {
    loop {
        let message = tokio::time::timeout(STEP, socket.recv())
            .await
            .expect("client frame in time")?;
        match message {
            Ok(Message::Close(frame)) => return frame.map(|f| f.code),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

pub async fn close_with(socket: &mut WebSocket, code: u16) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(""),
        })))
        .await;
}

pub async fn send_connected(socket: &mut WebSocket, connection_id: &str, token: &str) {
    send_json(
        socket,
        &json!({
            "type": "system",
            "event": "connected",
            "userId": "alice",
            "connectionId": connection_id,
            "reconnectionToken": token,
        }),
    )
    .await;
}

// =============================================================================
// CLIENT-SIDE HELPERS
// =============================================================================

pub async fn next_event<P>(events: &mut mpsc::UnboundedReceiver<ClientEvent<P>>) -> ClientEvent<P> {
    tokio::time::timeout(STEP, events.recv())
        .await
        .expect("client event in time")
        .expect("client alive")
}

/// Assert no event arrives within `window`.
#[allow(dead_code)]
pub async fn expect_no_event<P: std::fmt::Debug>(
    events: &mut mpsc::UnboundedReceiver<ClientEvent<P>>,
    window: Duration,
) {
    if let Ok(Some(event)) = tokio::time::timeout(window, events.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}
