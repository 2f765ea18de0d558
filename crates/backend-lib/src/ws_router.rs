// ============================
// livecollab-backend-lib/src/ws_router.rs
// ============================
//! HTTP surface: the WebSocket endpoint and a health probe.
//!
//! Admission happens *before* the upgrade: a missing or invalid credential
//! is answered with a plain 401 and no socket is ever established.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use livecollab_common::{ClientToServer, Identity, ServerToClient};

use crate::auth::extract_token;
use crate::auth::verifier::CredentialVerifier;
use crate::error::AppError;
use crate::room_actor::{ConnHandle, ConnId};
use crate::validation::validate_client_message;
use crate::AppState;

/// Outbound per-connection buffer; a session slower than this loses events
/// rather than stalling the registry.
const OUTBOX_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match admit(&state, params.token.as_deref(), &headers).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "websocket admission rejected");
            counter!("ws_rejections_total").increment(1);
            return e.into_response();
        },
    };
    info!(user = %identity.display_name, "websocket admitted");
    ws.on_upgrade(move |socket| handle_connection(socket, state, identity))
}

/// Resolve the caller's credential (query param preferred, session cookie
/// as fallback) into an identity.
async fn admit(
    state: &AppState,
    token_param: Option<&str>,
    headers: &HeaderMap,
) -> Result<Identity, AppError> {
    let token = extract_token(token_param, headers)?;
    state.verifier.verify(&token).await
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let conn_id: ConnId = Uuid::new_v4();
    counter!("ws_connections_total").increment(1);
    debug!(%conn_id, user = %identity.display_name, "websocket session started");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerToClient>(OUTBOX_CAPACITY);

    // Writer task: serializes registry events onto the socket.
    let send_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound event");
                    continue;
                },
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let conn = ConnHandle {
        id: conn_id,
        identity: Some(identity),
        tx: out_tx.clone(),
    };

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                if let Err(e) = dispatch(&state, &conn, &text).await {
                    debug!(%conn_id, error = %e, "client message rejected");
                    let _ = out_tx
                        .send(ServerToClient::Error {
                            message: e.sanitized_message(),
                        })
                        .await;
                }
            },
            Message::Close(_) => break,
            // pings are answered by axum; binary frames are ignored
            _ => {},
        }
    }

    debug!(%conn_id, "websocket session ended");
    state.rooms.disconnect(conn_id);
    send_task.abort();
}

async fn dispatch(state: &AppState, conn: &ConnHandle, text: &str) -> Result<(), AppError> {
    let msg: ClientToServer = serde_json::from_str(text)?;
    validate_client_message(&msg)?;

    match msg {
        ClientToServer::JoinRoom { kind, room_id } => {
            state.rooms.join(kind, room_id, conn.clone()).await?;
        },
        ClientToServer::RequestPayload { room_id } => {
            state.rooms.request_match_results(room_id, conn.id);
        },
        ClientToServer::UpdateSymbol { room_id, symbol } => {
            state.rooms.update_symbol(room_id, symbol, conn.id);
        },
        ClientToServer::SetDisplayName {
            kind,
            room_id,
            name,
        } => {
            state.rooms.set_display_name(kind, room_id, conn.id, name);
        },
    }
    Ok(())
}
