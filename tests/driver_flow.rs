use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{sleep, timeout};

use driver_client::api::gateway::HttpGateway;
use driver_client::config::Config;
use driver_client::error::ClientError;
use driver_client::models::ride::{HistoryStatus, RideStatus};
use driver_client::observability::metrics::Metrics;
use driver_client::realtime::transport::{Transport, WsTransport};
use driver_client::session::{MemorySessionStore, Session, SessionStore};
use driver_client::state::DriverApp;

const TOKEN: &str = "token-d1";

#[derive(Clone)]
struct Backend {
    received: mpsc::UnboundedSender<Value>,
    outbox: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {TOKEN}");
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(expected.as_str())
}

async fn socket(
    headers: HeaderMap,
    State(backend): State<Backend>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    upgrade.on_upgrade(move |socket| pump(socket, backend))
}

async fn pump(socket: WebSocket, backend: Backend) {
    let (mut sink, mut stream) = socket.split();
    let outbox = backend.outbox.clone();

    let writer = tokio::spawn(async move {
        let mut outbox = outbox.lock().await;
        while let Some(frame) = outbox.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        if let Message::Text(text) = message {
            if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                let _ = backend.received.send(frame);
            }
        }
    }
    writer.abort();
}

async fn presence(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "ok": true })).into_response()
}

async fn accept(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "_id": id, "status": "driver_assigned" }))
}

async fn advance(Path(id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "_id": id, "status": body["status"], "price": 12500 }))
}

async fn no_active_ride() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "No active ride" }))).into_response()
}

async fn rides() -> Json<Value> {
    Json(json!({ "rides": [], "total": 0, "page": 1, "limit": 50 }))
}

async fn earnings() -> Json<Value> {
    Json(json!({ "todayEarnings": 0, "todayRides": 0 }))
}

async fn notifications() -> Json<Value> {
    Json(json!([]))
}

async fn serve(backend: Backend) -> String {
    let router = Router::new()
        .route("/ws", get(socket))
        .route("/driver-app/status", put(presence))
        .route("/driver-app/ride/:id/accept", put(accept))
        .route("/driver-app/ride/:id/state", put(advance))
        .route("/driver-app/active-ride", get(no_active_ride))
        .route("/driver-app/rides", get(rides))
        .route("/driver-app/earnings", get(earnings))
        .route("/notifications", get(notifications))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

struct Harness {
    app: DriverApp,
    received: mpsc::UnboundedReceiver<Value>,
    push: mpsc::UnboundedSender<String>,
    addr: String,
}

async fn harness() -> Harness {
    let (received_tx, received) = mpsc::unbounded_channel();
    let (push, outbox) = mpsc::unbounded_channel();
    let addr = serve(Backend {
        received: received_tx,
        outbox: Arc::new(Mutex::new(outbox)),
    })
    .await;

    let config = Config::from_lookup(|key| match key {
        "API_BASE_URL" => Some(format!("http://{addr}")),
        "SOCKET_URL" => Some(format!("ws://{addr}/ws")),
        _ => None,
    })
    .unwrap();

    let session = Arc::new(MemorySessionStore::default());
    session
        .save(&Session {
            token: TOKEN.to_string(),
            driver: serde_json::from_value(json!({ "_id": "d1", "name": "Eric" })).unwrap(),
        })
        .unwrap();

    let metrics = Metrics::new();
    let gateway = Arc::new(
        HttpGateway::new(
            config.api_base_url.clone(),
            config.request_timeout,
            session.clone(),
            metrics.clone(),
        )
        .unwrap(),
    );
    let transport = Arc::new(WsTransport::new(
        config.socket_url.clone(),
        config.request_timeout,
    ));

    Harness {
        app: DriverApp::with_parts(config, session, gateway, transport, metrics),
        received,
        push,
        addr,
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let reached = timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

async fn frame_named(received: &mut mpsc::UnboundedReceiver<Value>, event: &str) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            let frame = received.recv().await.expect("socket closed");
            if frame["event"] == event {
                return frame;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {event} frame received"))
}

fn push(harness: &Harness, event: &str, data: Value) {
    harness
        .push
        .send(json!({ "event": event, "data": data }).to_string())
        .unwrap();
}

#[tokio::test]
async fn offer_is_accepted_then_lost_to_a_connection_timeout() {
    let mut harness = harness().await;
    let app = &harness.app;

    app.start().await.unwrap();
    eventually("connection", || app.channel.is_connected()).await;
    app.controller.go_online(None).await.unwrap();

    let join = frame_named(&mut harness.received, "join_driver").await;
    assert_eq!(join["data"], "d1");

    push(
        &harness,
        "new_ride_request",
        json!({
            "_id": "o1",
            "client_id": { "_id": "c1", "name": "Aline" },
            "pickup": { "address": "Rohero", "lat": -3.38, "lng": 29.36 },
            "destination": { "address": "Kinindo", "lat": -3.40, "lng": 29.35 },
            "distance": 4200,
            "price": 12500,
            "status": "request"
        }),
    );
    eventually("offer", || app.store.read(|s| s.offer().is_some())).await;

    assert!(app.controller.accept_offer().await.unwrap());
    app.store.read(|s| {
        assert_eq!(s.active_ride_id(), Some("o1"));
        assert_eq!(s.active_ride().map(|r| r.status), Some(RideStatus::Accepted));
        assert!(s.offer().is_none());
    });
    let join_ride = frame_named(&mut harness.received, "join_ride_room").await;
    assert_eq!(join_ride["data"], json!({ "tripId": "o1" }));

    push(
        &harness,
        "ride_cancelled",
        json!({ "tripId": "o1", "reason": "Connection timeout" }),
    );
    eventually("cancellation", || app.store.read(|s| s.active_ride().is_none())).await;

    app.store.read(|s| {
        assert!(s.is_online());
        assert_eq!(s.history()[0].status, HistoryStatus::Cancelled);
    });
}

#[tokio::test]
async fn sent_chat_reaches_the_backend_with_its_client_id() {
    let mut harness = harness().await;
    let app = &harness.app;

    app.start().await.unwrap();
    eventually("connection", || app.channel.is_connected()).await;
    app.controller.go_online(None).await.unwrap();
    push(
        &harness,
        "new_ride_request",
        json!({ "_id": "o2", "price": 8000, "status": "request" }),
    );
    eventually("offer", || app.store.read(|s| s.offer().is_some())).await;
    app.controller.accept_offer().await.unwrap();

    assert!(app.controller.send_chat("On my way"));
    let frame = frame_named(&mut harness.received, "send_message").await;
    let provisional_id = app.store.read(|s| s.chat()[0].id.clone());

    assert_eq!(frame["data"]["tripId"], "o2");
    assert_eq!(frame["data"]["sender"], "driver");
    assert_eq!(frame["data"]["clientId"], provisional_id.as_str());

    push(
        &harness,
        "new_message",
        json!({
            "_id": "m-1",
            "text": "On my way",
            "sender": "driver",
            "createdAt": chrono::Utc::now(),
            "tripId": "o2",
            "clientId": provisional_id
        }),
    );
    eventually("confirmation", || {
        app.store.read(|s| s.chat().first().is_some_and(|m| m.id == "m-1"))
    })
    .await;
    assert_eq!(app.store.read(|s| s.chat().len()), 1);
}

#[tokio::test]
async fn socket_rejects_a_wrong_token() {
    let harness = harness().await;
    let transport = WsTransport::new(format!("ws://{}/ws", harness.addr), Duration::from_secs(5));

    let err = transport.open("not-the-token").await.err().unwrap();

    assert!(matches!(err, ClientError::Unauthorized));
}

#[tokio::test]
async fn logout_forgets_the_driver() {
    let harness = harness().await;
    let app = &harness.app;

    app.start().await.unwrap();
    eventually("connection", || app.channel.is_connected()).await;
    app.controller.go_online(None).await.unwrap();

    app.logout().await.unwrap();

    assert!(app.resume().is_none());
    assert!(app.session.token().is_none());
    assert!(!app.store.read(|s| s.is_online()));
    assert!(app.channel.rooms().driver.is_none());
}
