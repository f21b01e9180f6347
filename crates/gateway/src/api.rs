//! HTTP API handlers and routes using axum.
//!
//! Routes:
//! - `GET /health` - Health check (no auth)
//! - `GET /ws` - WebSocket upgrade
//! - `POST /chat/rooms` - Open (or re-open) the room for a listing
//! - `GET /chat/rooms` - The caller's rooms with unread counts
//! - `POST /chat/rooms/{room_id}/messages` - HTTP-originated send
//! - `GET /chat/rooms/{room_id}/messages` - Paginated history; marks the
//!   counterparty's messages read as a side effect
//! - `PATCH /chat/messages/{message_id}/read` - Mark one message read
//! - `PATCH /chat/rooms/{room_id}/reservation` - Link a reservation
//!
//! All `/chat` routes require a bearer credential. Errors are JSON
//! `{"error": message, "code": CODE}` with the mapped status.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chat_store::ChatRoom;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{authenticate_header, CredentialValidator};
use crate::dispatcher::{HistoryPage, MessageDispatcher, RoomSummary};
use crate::error::GatewayError;
use crate::protocol::MessagePayload;
use crate::registry::SessionRegistry;
use crate::ws_server::ws_handler;

/// Shared application state.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<MessageDispatcher>,
    pub validator: Arc<dyn CredentialValidator>,
}

/// Create the service router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/chat/rooms", post(open_room_handler).get(list_rooms_handler))
        .route(
            "/chat/rooms/{room_id}/messages",
            post(send_message_handler).get(history_handler),
        )
        .route("/chat/messages/{message_id}/read", patch(mark_read_handler))
        .route(
            "/chat/rooms/{room_id}/reservation",
            patch(link_reservation_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    rooms: usize,
}

/// Health check endpoint.
/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        sessions: state.registry.session_count(),
        rooms: state.registry.room_count(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenRoomRequest {
    product_id: i64,
    seller_id: i64,
}

/// Open the chat room for a listing. The authenticated caller is the buyer.
/// POST /chat/rooms
async fn open_room_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<OpenRoomRequest>,
) -> Result<Json<ChatRoom>, GatewayError> {
    let buyer_id = authenticate_header(&headers, state.validator.as_ref()).await?;
    let room = state
        .dispatcher
        .open_room(req.product_id, buyer_id, req.seller_id)?;
    Ok(Json(room))
}

/// The caller's rooms with unread counts, most recent first.
/// GET /chat/rooms
async fn list_rooms_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<RoomSummary>>, GatewayError> {
    let user_id = authenticate_header(&headers, state.validator.as_ref()).await?;
    Ok(Json(state.dispatcher.rooms_for_user(user_id)?))
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    content: String,
}

/// HTTP-originated send. Responds with the persisted message.
/// POST /chat/rooms/{room_id}/messages
async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<MessagePayload>, GatewayError> {
    let sender_id = authenticate_header(&headers, state.validator.as_ref()).await?;
    let payload = state
        .dispatcher
        .send_message(room_id, sender_id, &req.content)
        .await?;
    Ok(Json(payload))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

/// Paginated room history, oldest first. Marks the counterparty's
/// messages read for the caller.
/// GET /chat/rooms/{room_id}/messages
async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<MessagePayload>>, GatewayError> {
    let reader_id = authenticate_header(&headers, state.validator.as_ref()).await?;
    let page = HistoryPage::from_query(query.page, query.limit);
    Ok(Json(state.dispatcher.history(room_id, reader_id, page)?))
}

#[derive(Serialize)]
struct OkResponse {
    status: &'static str,
}

/// Mark a single message as read.
/// PATCH /chat/messages/{message_id}/read
async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, GatewayError> {
    let reader_id = authenticate_header(&headers, state.validator.as_ref()).await?;
    state.dispatcher.mark_read(message_id, reader_id)?;
    Ok(Json(OkResponse { status: "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkReservationRequest {
    reservation_id: i64,
}

/// Link a reservation to a room once a trade is formalized.
/// PATCH /chat/rooms/{room_id}/reservation
async fn link_reservation_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<LinkReservationRequest>,
) -> Result<Json<OkResponse>, GatewayError> {
    let caller_id = authenticate_header(&headers, state.validator.as_ref()).await?;
    state
        .dispatcher
        .link_reservation(room_id, caller_id, req.reservation_id)?;
    Ok(Json(OkResponse { status: "ok" }))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotParticipant { .. } => StatusCode::FORBIDDEN,
            GatewayError::RoomNotFound(_) | GatewayError::MessageNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::InvalidContent(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::Json(_) => StatusCode::BAD_REQUEST,
            GatewayError::Persistence(_)
            | GatewayError::Fanout(_)
            | GatewayError::ChannelSend
            | GatewayError::SessionNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}
