//! WebSocket handler for device conversations.
//!
//! One socket carries any number of turns. Inbound messages are request
//! envelopes (`chat` or `cancel`); outbound messages are response envelopes,
//! one per audio chunk, each turn ending with a `stream_seq = -1` frame.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, Extension,
    },
    response::IntoResponse,
};
use cadence_pipeline::{ChunkConsumer, LatestTurnArbiter};
use cadence_types::envelope::{Method, RequestEnvelope, ResponseEnvelope, CODE_NOT_FOUND};
use cadence_types::{ConversationId, ErrorKind, TurnId};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound frames buffered per connection before forwarders wait.
const OUTBOUND_CAPACITY: usize = 256;

/// Upgrades the connection.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    tracing::info!(remote_addr = %addr, "websocket connected");
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    // Every turn forwarder writes through this channel; a single task owns
    // the socket's sending half.
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Turns started on this connection that may still be running.
    let mut started: HashSet<(ConversationId, TurnId)> = HashSet::new();

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => handle_text(&state, &tx, &mut started, text.as_str()),
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    let registry = state.dispatcher.registry();
    for (conversation_id, turn_id) in &started {
        if registry.cancel(conversation_id, turn_id) {
            tracing::debug!(
                conversation_id = %conversation_id,
                turn_id = %turn_id,
                "cancelled turn of closed connection"
            );
        }
    }
    send_task.abort();
    tracing::info!(remote_addr = %addr, "websocket disconnected");
}

fn handle_text(
    state: &AppState,
    tx: &mpsc::Sender<String>,
    started: &mut HashSet<(ConversationId, TurnId)>,
    text: &str,
) {
    let envelope: RequestEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            let (conversation_id, turn_id) = salvage_ids(text);
            tracing::warn!(
                conversation_id = %conversation_id,
                turn_id = %turn_id,
                "malformed request envelope: {}",
                e
            );
            send_status(
                tx,
                conversation_id,
                turn_id,
                ErrorKind::InvalidRequest.code(),
                format!("invalid request: {}", e),
            );
            return;
        }
    };

    match envelope.method {
        Method::Chat => start_turn(state, tx, started, envelope),
        Method::Cancel => {
            let cancelled = state
                .dispatcher
                .cancel(&envelope.conversation_id, &envelope.turn_id);
            tracing::info!(
                conversation_id = %envelope.conversation_id,
                turn_id = %envelope.turn_id,
                cancelled,
                "cancel requested"
            );
            let (code, message) = if cancelled {
                (0, "cancelled")
            } else {
                (CODE_NOT_FOUND, "not found")
            };
            send_status(tx, envelope.conversation_id, envelope.turn_id, code, message);
        }
    }
}

fn start_turn(
    state: &AppState,
    tx: &mpsc::Sender<String>,
    started: &mut HashSet<(ConversationId, TurnId)>,
    envelope: RequestEnvelope,
) {
    let conversation_id = envelope.conversation_id.clone();
    let turn_id = envelope.turn_id.clone();

    let turn = match envelope.into_turn() {
        Ok(turn) => turn,
        Err(e) => {
            tracing::warn!(
                conversation_id = %conversation_id,
                turn_id = %turn_id,
                "rejected chat request: {}",
                e
            );
            send_status(tx, conversation_id, turn_id, e.kind().code(), e.to_string());
            return;
        }
    };

    tracing::info!(
        conversation_id = %conversation_id,
        turn_id = %turn_id,
        modality = turn.modality().as_str(),
        "turn received"
    );

    match state.dispatcher.dispatch(turn) {
        Ok(handle) => {
            let registry = state.dispatcher.registry();
            started.retain(|(conv, id)| registry.contains(conv, id));
            started.insert((handle.conversation_id.clone(), handle.turn_id.clone()));
            tokio::spawn(forward_turn(
                state.dispatcher.arbiter().clone(),
                handle.consumer,
                handle.conversation_id,
                tx.clone(),
            ));
        }
        Err(e) => match e.kind() {
            Some(kind) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    turn_id = %turn_id,
                    "turn rejected: {}",
                    e
                );
                send_status(tx, conversation_id, turn_id, kind.code(), e.to_string());
            }
            None => {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    turn_id = %turn_id,
                    "turn refused: {}",
                    e
                );
            }
        },
    }
}

/// Drains one turn's queue onto the connection.
///
/// Before every write the arbiter is asked whether the turn is still the
/// latest of its conversation; chunks of a superseded turn (its sentinel
/// included) are dropped. The queue keeps being drained so the producer is
/// never left blocked on a full queue.
pub async fn forward_turn(
    arbiter: LatestTurnArbiter,
    mut consumer: ChunkConsumer,
    conversation_id: ConversationId,
    tx: mpsc::Sender<String>,
) {
    let mut dropped = 0u32;
    while let Some(chunk) = consumer.get().await {
        if !arbiter.is_latest(&conversation_id, &chunk.turn_id) {
            dropped += 1;
            tracing::debug!(
                conversation_id = %conversation_id,
                turn_id = %chunk.turn_id,
                stream_seq = chunk.stream_seq,
                "dropping chunk of superseded turn"
            );
            continue;
        }

        let envelope = ResponseEnvelope::from_chunk(&conversation_id, &chunk);
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(turn_id = %chunk.turn_id, "failed to serialize response: {}", e);
                continue;
            }
        };
        if tx.send(json).await.is_err() {
            tracing::debug!(
                conversation_id = %conversation_id,
                turn_id = %chunk.turn_id,
                "connection closed, stopping delivery"
            );
            break;
        }
    }
    if dropped > 0 {
        tracing::debug!(conversation_id = %conversation_id, dropped, "superseded turn drained");
    }
}

/// Best-effort recovery of the ids of an envelope that failed to parse, so
/// the client can match the error to its request.
fn salvage_ids(text: &str) -> (ConversationId, TurnId) {
    let value: Value = serde_json::from_str(text).unwrap_or(Value::Null);
    let field = |name: &str| match value.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    (
        ConversationId::new(field("conversation_id")),
        TurnId::new(field("turn_id")),
    )
}

fn send_status(
    tx: &mpsc::Sender<String>,
    conversation_id: ConversationId,
    turn_id: TurnId,
    code: u32,
    message: impl Into<String>,
) {
    let envelope = ResponseEnvelope::status(conversation_id, turn_id, code, message);
    match serde_json::to_string(&envelope) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to send status frame to client: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize status frame: {}", e);
        }
    }
}
