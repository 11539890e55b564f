//! HTTP and WebSocket surface using Axum.
//!
//! - `/ws/realtime` data session: attached to the engine, receives snapshots
//!   for every symbol its user holds, and accepts commands.
//! - `/ws/subscribe` command-only session: edits the user's subscription set
//!   and gets acknowledgements, never snapshots.
//! - `/api/subscriptions` the caller's symbols as JSON.
//! - `/health` engine counters.
//!
//! Every endpoint except `/health` authenticates through the token cache and
//! answers 401 before any upgrade when that fails.

use crate::auth::{bearer_token, handshake_credential, Identity, TokenValidationCache};
use crate::engine::StreamingEngine;
use crate::error::{AuthError, GatewayError, Result};
use crate::protocol::ServerMessage;
use crate::session::Session;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);
/// A client silent for this long, pongs included, is disconnected.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Shared application state.
pub struct AppState {
    pub engine: Arc<StreamingEngine>,
    pub auth: Arc<TokenValidationCache>,
    /// Outbound queue bound for each session.
    pub session_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionKind {
    Realtime,
    Control,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/realtime", get(realtime_handler))
        .route("/ws/subscribe", get(subscribe_handler))
        .route("/api/subscriptions", get(subscriptions_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.engine.stats();
    Json(serde_json::json!({
        "status": "ok",
        "sessions": stats.sessions,
        "users": stats.users,
        "feeds": stats.feeds,
    }))
}

async fn subscriptions_handler(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let credential = match bearer_token(&headers) {
        Some(token) => token,
        None => return unauthorized(AuthError::MissingCredential),
    };
    match state.auth.validate(credential).await {
        Ok(identity) => {
            Json(state.engine.registry().subscriptions(&identity.username)).into_response()
        }
        Err(e) => unauthorized(e),
    }
}

async fn realtime_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, query, headers, state, SessionKind::Realtime).await
}

async fn subscribe_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, query, headers, state, SessionKind::Control).await
}

/// Authenticate, then upgrade. No session exists until this succeeds.
async fn upgrade(
    ws: WebSocketUpgrade,
    query: TokenQuery,
    headers: HeaderMap,
    state: Arc<AppState>,
    kind: SessionKind,
) -> Response {
    let identity = match authenticate(&state, query.token.as_deref(), &headers).await {
        Ok(identity) => identity,
        Err(e) => {
            counter!("price_gateway_handshake_rejections_total").increment(1);
            return unauthorized(e);
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity, kind))
}

async fn authenticate(
    state: &AppState,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> std::result::Result<Identity, AuthError> {
    let credential = handshake_credential(query_token, headers)?;
    state.auth.validate(credential).await
}

fn unauthorized(e: AuthError) -> Response {
    debug!("Rejecting request: {}", e);
    (
        StatusCode::UNAUTHORIZED,
        GatewayError::Unauthenticated(e).to_string(),
    )
        .into_response()
}

/// Handle an authenticated WebSocket connection.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    identity: Identity,
    kind: SessionKind,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (session, mut rx) = Session::channel(identity.username, state.session_buffer);
    let session_id = session.id();

    if kind == SessionKind::Realtime {
        state.engine.connect(session.clone());
    }

    counter!("price_gateway_connections_total").increment(1);
    gauge!("price_gateway_active_connections").increment(1.0);
    info!("Session {} ({:?}) connected for {}", session_id, kind, session.user());

    // Forward queued frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(msg)) => {
                        if let Err(e) = handle_message(&state, &session, msg) {
                            warn!("Error handling message from {}: {}", session_id, e);
                            if session.is_closed() {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {:?}", session_id, e);
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if session.is_stale(CLIENT_TIMEOUT) {
                    info!("Session {} timed out", session_id);
                    break;
                }
                if !session.try_send_raw(Message::Ping(vec![].into())) && session.is_closed() {
                    break;
                }
            }
        }
    }

    // Cleanup
    let released = if kind == SessionKind::Realtime {
        state.engine.disconnect(&session)
    } else {
        0
    };
    send_task.abort();

    counter!("price_gateway_disconnections_total").increment(1);
    gauge!("price_gateway_active_connections").decrement(1.0);
    info!(
        "Session {} disconnected, released {} subscriptions",
        session_id, released
    );
}

/// Handle a single WebSocket frame. Errors come from queueing the reply.
fn handle_message(state: &AppState, session: &Session, msg: Message) -> Result<()> {
    session.touch();
    match msg {
        Message::Text(text) => {
            let reply = state.engine.handle_text(session, text.as_str());
            session.send_text(reply.to_string())
        }
        Message::Binary(data) => {
            let reply = match std::str::from_utf8(&data) {
                Ok(text) => state.engine.handle_text(session, text),
                Err(_) => ServerMessage::InvalidCommand,
            };
            session.send_text(reply.to_string())
        }
        Message::Ping(data) => {
            session.try_send_message(Message::Pong(data))?;
            Ok(())
        }
        Message::Pong(_) | Message::Close(_) => Ok(()),
    }
}
