use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Json;
use axum::Router;
use futures::SinkExt;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use crate::engine::listener::Listener;
use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::message::ChatMessage;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests/:id/chat", get(chat_status))
        .route("/requests/:id/messages", get(list_messages).post(send_message))
        .route("/requests/:id/messages/ws", get(messages_ws))
}

#[derive(Serialize)]
pub struct ChatStatusResponse {
    pub enabled: bool,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

async fn chat_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    _identity: Identity,
) -> Result<Json<ChatStatusResponse>, AppError> {
    let enabled = state.chat.is_chat_enabled(&id).await?;
    Ok(Json(ChatStatusResponse { enabled }))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let messages = state.chat.messages(&identity, &id).await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<ChatMessage>, AppError> {
    let message = state.chat.send_message(&identity, &id, &payload.text).await?;
    Ok(Json(message))
}

async fn messages_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
) -> Result<Response, AppError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = state
        .chat
        .subscribe_messages(&identity, &id, move |messages| {
            let _ = tx.send(messages);
        })
        .await?;

    info!(request_id = %id, user_id = %identity.user_id, "chat websocket opened");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, listener, rx)))
}

async fn handle_socket(
    socket: WebSocket,
    listener: Listener,
    updates: mpsc::UnboundedReceiver<Vec<ChatMessage>>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = UnboundedReceiverStream::new(updates);

    let mut send_task = tokio::spawn(async move {
        while let Some(messages) = updates.next().await {
            let json = match serde_json::to_string(&messages) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize messages for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let subscription_id = listener.id();
    if let Err(err) = listener.cancel().await {
        warn!(subscription_id = subscription_id.0, error = %err, "failed to cancel message listener");
    }
    info!(subscription_id = subscription_id.0, "chat websocket closed");
}
