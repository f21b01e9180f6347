//! WebSocket endpoint: handshake authentication and frame routing.
//!
//! A connection authenticates either at the upgrade request (via its
//! `Authorization` header) or with an `auth` frame as its first send.
//! Until an identity is bound, subscribe and send operations are refused
//! with an `AUTH_REQUIRED` error frame - never silently dropped - and a
//! failed `auth` frame closes the connection.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::auth::{self, AuthError};
use crate::error::{GatewayError, Result};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::registry::{SessionState, SESSION_CHANNEL_BUFFER};

/// Whether the connection should stay open after a frame is handled.
#[derive(Debug)]
enum FrameOutcome {
    Continue,
    Close,
}

/// WebSocket upgrade handler.
///
/// An `Authorization` header is validated before the upgrade completes;
/// rejected credentials never produce a session. Without the header the
/// socket is accepted pending an `auth` frame.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = if headers.contains_key(AUTHORIZATION) {
        match auth::authenticate_header(&headers, state.validator.as_ref()).await {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                warn!(error = %e, "rejected WebSocket handshake");
                counter!("chat_handshake_rejected_total").increment(1);
                return GatewayError::from(e).into_response();
            }
        }
    } else {
        None
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Handle a WebSocket connection for its lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Option<i64>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Bounded outbound channel; room delivery drops frames rather than
    // block on a slow socket.
    let (tx, mut rx) = mpsc::channel::<Message>(SESSION_CHANNEL_BUFFER);

    let session = Arc::new(SessionState::new(tx));
    if let Some(user_id) = identity {
        session.bind_identity(user_id);
    }
    let session_id = state.registry.register(session.clone());

    counter!("chat_connections_total").increment(1);
    gauge!("chat_active_sessions").set(state.registry.session_count() as f64);

    info!(session_id = %session_id, authenticated = session.is_authenticated(), "session connected");

    // Forward frames from the channel to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut ping_interval = interval(Duration::from_secs(30));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        match handle_frame(&state, &session, msg).await {
                            Ok(FrameOutcome::Continue) => {}
                            Ok(FrameOutcome::Close) => break,
                            Err(e) => {
                                warn!(session_id = %session_id, error = %e, "error handling frame");
                                let _ = session.send(&ServerFrame::Error {
                                    message: e.to_string(),
                                    code: e.code().to_string(),
                                });
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if session.tx.try_send(Message::Ping(vec![].into())).is_err() {
                    break;
                }
            }
        }
    }

    state.registry.unregister(&session_id);
    send_task.abort();

    counter!("chat_disconnections_total").increment(1);
    gauge!("chat_active_sessions").set(state.registry.session_count() as f64);

    info!(session_id = %session_id, "session disconnected");
}

/// Handle a single WebSocket message.
async fn handle_frame(
    state: &Arc<AppState>,
    session: &Arc<SessionState>,
    msg: Message,
) -> Result<FrameOutcome> {
    match msg {
        Message::Text(text) => {
            let frame: ClientFrame = serde_json::from_str(&text)?;
            handle_client_frame(state, session, frame).await
        }
        Message::Binary(data) => {
            let frame: ClientFrame = serde_json::from_slice(&data)?;
            handle_client_frame(state, session, frame).await
        }
        Message::Ping(data) => {
            session.update_ping();
            session
                .tx
                .try_send(Message::Pong(data))
                .map_err(|_| GatewayError::ChannelSend)?;
            Ok(FrameOutcome::Continue)
        }
        Message::Pong(_) => {
            session.update_ping();
            Ok(FrameOutcome::Continue)
        }
        Message::Close(_) => Ok(FrameOutcome::Continue),
    }
}

/// Handle a parsed client frame.
async fn handle_client_frame(
    state: &Arc<AppState>,
    session: &Arc<SessionState>,
    frame: ClientFrame,
) -> Result<FrameOutcome> {
    match frame {
        ClientFrame::Auth { token } => {
            if session.is_authenticated() {
                let e = GatewayError::InvalidRequest("identity already bound to this connection");
                session.send(&ServerFrame::Error {
                    message: e.to_string(),
                    code: e.code().to_string(),
                })?;
                return Ok(FrameOutcome::Continue);
            }

            match state.validator.validate(&token).await {
                Ok(user_id) => {
                    session.bind_identity(user_id);
                    counter!("chat_frame_auth_total").increment(1);
                    session.send(&ServerFrame::Authenticated { user_id })?;
                    Ok(FrameOutcome::Continue)
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "auth frame rejected, closing");
                    let e = GatewayError::from(e);
                    let _ = session.send(&ServerFrame::Error {
                        message: e.to_string(),
                        code: e.code().to_string(),
                    });
                    Ok(FrameOutcome::Close)
                }
            }
        }
        ClientFrame::Subscribe { room_id } => {
            debug!(session_id = %session.id, room_id, "subscribe request");
            state.registry.subscribe(&session.id, room_id)?;
            session.send(&ServerFrame::Subscribed { room_id })?;
            counter!("chat_subscriptions_total").increment(1);
            Ok(FrameOutcome::Continue)
        }
        ClientFrame::Unsubscribe { room_id } => {
            debug!(session_id = %session.id, room_id, "unsubscribe request");
            state.registry.unsubscribe(&session.id, room_id)?;
            session.send(&ServerFrame::Unsubscribed { room_id })?;
            Ok(FrameOutcome::Continue)
        }
        ClientFrame::Send { room_id, content } => {
            // Sender identity comes from the session, never the frame.
            let sender_id = session
                .user_id()
                .ok_or(GatewayError::Authentication(AuthError::Unauthenticated))?;
            state
                .dispatcher
                .send_message(room_id, sender_id, &content)
                .await?;
            // No synchronous echo: delivery happens via the broker
            // round-trip like on every other process.
            Ok(FrameOutcome::Continue)
        }
        ClientFrame::Ping => {
            session.update_ping();
            session.send(&ServerFrame::Pong)?;
            Ok(FrameOutcome::Continue)
        }
    }
}
