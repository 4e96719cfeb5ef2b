//! HTTP control endpoints for turns.

use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use cadence_pipeline::TurnLookup;
use cadence_types::{ConversationId, TurnId};
use serde_json::{json, Value};
use std::sync::Arc;

fn cancelled(conversation_id: &ConversationId, turn_id: &TurnId) -> (StatusCode, Json<Value>) {
    tracing::info!(
        conversation_id = %conversation_id,
        turn_id = %turn_id,
        "turn cancelled over http"
    );
    (
        StatusCode::OK,
        Json(json!({
            "conversation_id": conversation_id,
            "turn_id": turn_id,
            "status": "cancelled",
        })),
    )
}

fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "status": "not found" })))
}

/// `POST /api/turns/{turn_id}/cancel`
///
/// Cancels an in-flight turn from outside its connection (for example a
/// companion app's stop button). Turn ids are only unique within a
/// conversation; an id that is live in several is refused with `409`.
pub async fn cancel_turn_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(turn_id): Path<String>,
) -> impl IntoResponse {
    let turn_id = TurnId::new(turn_id);
    match state.dispatcher.cancel_turn(&turn_id) {
        TurnLookup::Cancelled(conversation_id) => cancelled(&conversation_id, &turn_id),
        TurnLookup::NotFound => not_found(),
        TurnLookup::Ambiguous => {
            tracing::warn!(turn_id = %turn_id, "ambiguous cancel refused");
            (
                StatusCode::CONFLICT,
                Json(json!({
                    "turn_id": turn_id,
                    "status": "ambiguous",
                    "message": "turn id is live in more than one conversation",
                })),
            )
        }
    }
}

/// `POST /api/conversations/{conversation_id}/turns/{turn_id}/cancel`
pub async fn cancel_conversation_turn_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((conversation_id, turn_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let conversation_id = ConversationId::new(conversation_id);
    let turn_id = TurnId::new(turn_id);
    if state.dispatcher.cancel(&conversation_id, &turn_id) {
        cancelled(&conversation_id, &turn_id)
    } else {
        not_found()
    }
}
