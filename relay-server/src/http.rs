use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::config::ServerConfig;
use crate::network::gateway;
use crate::network::registry::PeerRegistry;
use crate::storage::{MessageStore, StoreError};

/// Shared state behind every route and every signaling connection.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PeerRegistry>,
    pub store: Arc<MessageStore>,
    pub config: Arc<ServerConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/messages", get(get_messages).post(post_message))
        .route("/api/peers", get(get_peers))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now().timestamp_millis() }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    match state.store.latest(query.limit) {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageBody {
    sender_id: String,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    receiver_id: Option<String>,
    content: String,
}

async fn post_message(
    State(state): State<AppState>,
    Json(body): Json<PostMessageBody>,
) -> Response {
    match state.store.save(
        &body.sender_id,
        &body.content,
        body.receiver_id.as_deref(),
        body.sender_name.as_deref(),
    ) {
        Ok(message) => (StatusCode::CREATED, Json(json!({ "message": message }))).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn get_peers(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "peers": state.registry.list() }))
}

fn store_error_response(err: StoreError) -> Response {
    let status = match err {
        StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// Credential comes from the `apiKey` query parameter or the `x-api-key`
/// header; the gateway enforces it after the upgrade so the client gets a
/// readable error envelope before the policy-violation close.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let credential = params.get("apiKey").cloned().or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    });
    ws.on_upgrade(move |socket| gateway::handle_connection(socket, state, credential))
}
