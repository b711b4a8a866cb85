use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::routes::extract::{authenticate, ApiQuery};
use crate::services::notifier::{ServerMessage, UserSubscription};

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// Frames a client may send. Anything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
}

/// GET /ws/jobs/?token=...
///
/// The token is checked before the upgrade so an unauthenticated client gets
/// a plain 401 instead of a socket that closes immediately.
pub async fn job_updates(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SocketQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let token = query.token.as_deref().ok_or_else(ApiError::unauthorized)?;
    let auth = authenticate(&state, token).await?;

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let user_id = auth.user.id;
    let subscription = state.hub.subscribe(user_id);
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, subscription, user_id)))
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode WebSocket message");
            None
        }
    }
}

async fn serve_socket(socket: WebSocket, mut subscription: UserSubscription, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!(user_id = %user_id, "WebSocket connected");

    let hello = ServerMessage::ConnectionEstablished {
        message: "Connected to job updates".to_string(),
    };
    if let Some(frame) = encode(&hello) {
        if sender.send(frame).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else { break };
                if let Some(frame) = encode(&event) {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ClientMessage::Ping) = serde_json::from_str(text.as_str()) {
                            if let Some(frame) = encode(&ServerMessage::Pong) {
                                if sender.send(frame).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!(user_id = %user_id, "WebSocket disconnected");
}
