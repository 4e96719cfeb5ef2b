//! HTTP and WebSocket surface of the Cadence voice pipeline.
//!
//! A device holds one WebSocket open for a whole conversation. Every chat
//! message starts a turn through the [`TurnDispatcher`]; the turn's audio
//! chunks are streamed back on the same socket as they are synthesized.

pub mod api_turns;
pub mod api_ws;
pub mod background;
pub mod config;

use axum::{
    extract::Extension,
    routing::{get, post},
    Json, Router,
};
use cadence_pipeline::{
    CancellationRegistry, ConversationMemory, LatestTurnArbiter, Orchestrator, PipelineSettings,
    TurnDispatcher,
};
use cadence_voice::{
    HttpGenerator, KeywordRouter, RoutingConfig, SttService, TtsService, VoiceError,
};
use config::Config;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Default largest inbound WebSocket message, in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: TurnDispatcher,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_bytes: usize,
}

impl AppState {
    pub fn new(dispatcher: TurnDispatcher) -> Self {
        Self {
            dispatcher,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Wires the configured adapters into a dispatcher.
///
/// # Errors
///
/// Returns `VoiceError` if an adapter cannot be constructed (for example
/// the generation HTTP client fails to build).
pub fn build_state(config: &Config) -> Result<AppState, VoiceError> {
    let voice = &config.voice;
    let transcriber = SttService::new(&voice.stt.model_path, &voice.stt.binary_path);
    let synthesizer = TtsService::new(
        voice.tts.profile.clone(),
        &voice.tts.voices_dir,
        &voice.tts.binary_path,
    );
    let router = KeywordRouter::new(
        &RoutingConfig {
            intents: config.routing.intents.clone(),
        },
        &config.routing.artifacts_dir,
    );
    let generator = HttpGenerator::new(voice.generation.clone())?;

    let pipeline = &config.pipeline;
    let settings = PipelineSettings {
        system_prompt: voice.generation.system_prompt.clone(),
        min_sentence_length: pipeline.min_sentence_length,
        routing_timeout: pipeline.routing_timeout(),
        routing_confidence_threshold: pipeline.routing_confidence_threshold,
        default_output_format: pipeline.default_output_format,
        safety_apology: pipeline.safety_apology.clone(),
    };

    tracing::info!(
        stt_binary = %voice.stt.binary_path,
        tts_binary = %voice.tts.binary_path,
        voice = %voice.tts.profile.id,
        generation_url = %voice.generation.base_url,
        generation_model = %voice.generation.model,
        intents = config.routing.intents.len(),
        "voice collaborators configured"
    );

    let orchestrator = Orchestrator::new(
        Arc::new(transcriber),
        Arc::new(router),
        Arc::new(generator),
        Arc::new(synthesizer),
        ConversationMemory::new(pipeline.memory_window),
        settings,
    );
    let dispatcher = TurnDispatcher::new(
        orchestrator,
        CancellationRegistry::new(),
        LatestTurnArbiter::new(),
    )
    .with_queue_capacity(pipeline.queue_capacity);

    Ok(AppState {
        dispatcher,
        max_message_bytes: config.server.max_message_bytes,
    })
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_turns": state.dispatcher.registry().len(),
        "conversations": state.dispatcher.arbiter().len(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(api_ws::ws_handler))
        .route(
            "/api/turns/{turn_id}/cancel",
            post(api_turns::cancel_turn_handler),
        )
        .route(
            "/api/conversations/{conversation_id}/turns/{turn_id}/cancel",
            post(api_turns::cancel_conversation_turn_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_returns_ok() {
        let state = build_state(&Config::default()).unwrap();
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["active_turns"], 0);
        assert_eq!(json["conversations"], 0);
    }
}
