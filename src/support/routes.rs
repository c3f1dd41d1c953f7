//! HTTP + WebSocket surface for the agent dashboard.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use super::model::{
    CannedDraft, CustomerInfo, MessageFilter, MessageStatus, ReplyDraft, null_as_empty,
};
use super::notifier::{BroadcastNotifier, DashboardEvent};
use super::service::MessageService;
use crate::error::ServiceError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MessageService>,
    /// Source of events for `/ws` sessions.
    pub events: Arc<BroadcastNotifier>,
}

/// Build the Axum router with the dashboard REST and WebSocket routes.
pub fn console_routes(service: Arc<MessageService>, events: Arc<BroadcastNotifier>) -> Router {
    let state = AppState { service, events };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/messages", get(list_messages))
        .route("/api/messages/{id}", get(get_message))
        .route("/api/messages/{id}/reply", post(reply_to_message))
        .route("/api/messages/{id}/read", post(mark_read))
        .route("/api/customers/send-message", post(send_message))
        .route(
            "/api/canned-messages",
            get(list_canned).post(create_canned),
        )
        .route("/api/search", get(search))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

/// Map a service failure to its HTTP status. Store details stay in the log.
fn service_error(err: ServiceError) -> Response {
    match err {
        ServiceError::Validation(msg) => error_body(StatusCode::BAD_REQUEST, msg),
        ServiceError::NotFound { entity, .. } => {
            error_body(StatusCode::NOT_FOUND, format!("{entity} not found"))
        }
        ServiceError::Database(e) => {
            error!(error = %e, "Store operation failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "support-console"
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.events))
}

async fn send_event(socket: &mut WebSocket, event: &DashboardEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(WsFrame::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize dashboard event");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, events: Arc<BroadcastNotifier>) {
    // Subscribe before greeting so nothing published in between is missed
    let mut rx = events.subscribe();

    if !send_event(&mut socket, &DashboardEvent::connected()).await {
        warn!("Failed to send greeting, client disconnected");
        return;
    }
    info!("WebSocket client connected");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_event(&mut socket, &event).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(WsFrame::Ping(data))) => {
                        if socket.send(WsFrame::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsFrame::Text(text))) => {
                        debug!(text = %text.as_str(), "Ignoring client WS message");
                    }
                    Some(Ok(WsFrame::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

// ── Messages ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
    priority: Option<String>,
    search: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> Result<MessageFilter, String> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(raw) => Some(raw.parse::<MessageStatus>()?),
        };

        let min_priority = match self.priority.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| format!("Invalid priority: {raw}"))?;
                Some(value.clamp(0, i64::from(u8::MAX)) as u8)
            }
        };

        Ok(MessageFilter {
            status,
            min_priority,
            search: self.search.filter(|s| !s.is_empty()),
        })
    }
}

async fn list_messages(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(msg) => return error_body(StatusCode::BAD_REQUEST, msg),
    };

    match state.service.list(&filter).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => service_error(e),
    }
}

async fn get_message(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.service.get_with_conversation(id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => service_error(e),
    }
}

async fn reply_to_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(draft): Json<ReplyDraft>,
) -> Response {
    match state.service.reply(id, draft).await {
        Ok(reply) => Json(serde_json::json!({"success": true, "reply_id": reply.id})).into_response(),
        Err(e) => service_error(e),
    }
}

async fn mark_read(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.service.mark_read(id).await {
        Ok(()) => Json(serde_json::json!({"success": true})).into_response(),
        Err(e) => service_error(e),
    }
}

// ── Customers ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SendMessageRequest {
    #[serde(flatten)]
    customer: CustomerInfo,
    #[serde(default, deserialize_with = "null_as_empty")]
    content: String,
}

async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    match state
        .service
        .submit_incoming(body.customer, &body.content)
        .await
    {
        Ok(submitted) => (
            StatusCode::OK,
            Json(serde_json::json!({"success": true, "message_id": submitted.message.id})),
        )
            .into_response(),
        Err(e) => service_error(e),
    }
}

// ── Canned messages ─────────────────────────────────────────────────────

async fn list_canned(State(state): State<AppState>) -> Response {
    match state.service.list_canned().await {
        Ok(canned) => Json(canned).into_response(),
        Err(e) => service_error(e),
    }
}

async fn create_canned(
    State(state): State<AppState>,
    Json(draft): Json<CannedDraft>,
) -> Response {
    match state.service.create_canned(draft).await {
        Ok(canned) => Json(serde_json::json!({"success": true, "id": canned.id})).into_response(),
        Err(e) => service_error(e),
    }
}

// ── Search ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    match state.service.search(&query.q).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => service_error(e),
    }
}
