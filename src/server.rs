//! ==============================================================================
//! server.rs - http + websocket surface
//! ==============================================================================
//!
//! purpose:
//!     exposes the hub to dashboard clients. one websocket endpoint carries the
//!     whole event protocol; a couple of json endpoints and the built frontend
//!     are served next to it.
//!
//! routes:
//!     GET /ws            - websocket upgrade (?id=<client>&admin_secret=<secret>)
//!     GET /api/widgets   - widget catalog + current global list
//!     GET /api/health    - liveness, session count, telemetry source status
//!     *                  - built frontend (spa fallback to index.html),
//!                          or a redirect to the dev server in dev mode
//!
//! relationships:
//!     - used by: main.rs, tests/server_test.rs
//!     - uses: broadcast.rs (hub), protocol.rs (wire events)
//!
//! ==============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{header::HOST, HeaderMap, Uri},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use crate::broadcast::Hub;
use crate::config::ServerConfig;
use crate::domain::SIMULATOR_PORT;
use crate::error::HubError;
use crate::protocol::{ClientEvent, Envelope, Handshake, ServerEvent};
use crate::registry::SESSION_QUEUE_CAPACITY;

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub server: Arc<ServerConfig>,
}

pub fn router(hub: Hub, server: ServerConfig) -> Router {
    let dev_mode = server.dev_mode;
    let static_dir = server.static_dir.clone();
    let state = AppState { hub, server: Arc::new(server) };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/widgets", get(widgets_handler))
        .route("/api/health", get(health_handler));

    let app = if dev_mode {
        app.fallback(dev_redirect_handler)
    } else {
        let index = static_dir.join("index.html");
        app.fallback_service(ServeDir::new(static_dir).fallback(ServeFile::new(index)))
    };

    app.layer(CorsLayer::permissive()).with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}

// ==============================================================================
// json endpoints
// ==============================================================================

#[derive(Serialize)]
struct WidgetsResponse {
    catalog: Vec<String>,
    global: Vec<String>,
}

async fn widgets_handler(State(state): State<AppState>) -> Json<WidgetsResponse> {
    Json(WidgetsResponse {
        catalog: state.hub.catalog().names().to_vec(),
        global: state.hub.global_widgets().await,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    /// selected serial port or SIMULATOR
    source: Option<String>,
    /// the simulator is always connected; a port only while its link is open
    source_connected: bool,
    receiving_data: bool,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.hub.session_count().await;
    let Some(control) = state.hub.acquisition() else {
        return Json(HealthResponse {
            status: "ok",
            sessions,
            source: None,
            source_connected: false,
            receiving_data: false,
        });
    };
    let source = control.target_port();
    Json(HealthResponse {
        status: "ok",
        sessions,
        source_connected: source == SIMULATOR_PORT || control.is_connected_to(&source),
        receiving_data: control.has_recent_data_on(&source),
        source: Some(source),
    })
}

/// dev mode: pages come from the frontend dev server on the same host
async fn dev_redirect_handler(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> Redirect {
    let hostname = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(':').next())
        .filter(|h| !h.is_empty())
        .unwrap_or("localhost");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    Redirect::temporary(&format!("http://{}:{}{}", hostname, state.server.dev_server_port, path))
}

// ==============================================================================
// websocket sessions
// ==============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(handshake): Query<Handshake>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, handshake, addr))
        .into_response()
}

async fn handle_socket(socket: WebSocket, hub: Hub, handshake: Handshake, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<ServerEvent>>(SESSION_QUEUE_CAPACITY);

    let session_id = hub.connect(handshake, addr.ip().to_string(), tx).await;

    // writer: drains the session channel until the hub drops the sender
    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(event.as_ref()) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(event = event.name(), "cannot encode event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch(&hub, &session_id, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session = %session_id, "websocket error: {}", e);
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    hub.disconnect(&session_id).await;
    writer.abort();
}

/// The event name is read before the payload so that a non-admin always gets
/// `admin_auth_failed` for an admin-only event, even with a malformed payload.
async fn dispatch(hub: &Hub, session_id: &str, text: &str) {
    let envelope = match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(session = %session_id, "ignoring malformed frame: {}", e);
            return;
        }
    };
    if !ClientEvent::requires_admin(&envelope.event) {
        tracing::debug!(session = %session_id, event = %envelope.event, "ignoring unknown event");
        return;
    }
    if hub.authorize(session_id).await.is_err() {
        return;
    }

    let event = match ClientEvent::from_envelope(envelope) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(session = %session_id, "ignoring malformed event: {}", e);
            return;
        }
    };
    match hub.handle_event(session_id, event).await {
        Ok(()) => {}
        // already answered with admin_auth_failed
        Err(HubError::NotAuthenticated) => {}
        Err(e) => tracing::warn!(session = %session_id, "event failed: {}", e),
    }
}
