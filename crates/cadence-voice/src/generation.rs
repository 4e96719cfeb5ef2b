//! Streaming answer generation against an OpenAI-compatible endpoint.

use crate::collaborator::{
    ChatMessage, ChatRole, GenerationEvent, GenerationStream, Generator, MessageContent,
};
use crate::config::GenerationConfig;
use crate::error::VoiceError;
use crate::sse::{SseEvent, SseLineParser};
use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

/// Finish reasons and error codes providers use for safety refusals.
const SAFETY_MARKERS: &[&str] = &["content_filter", "content_policy_violation", "safety"];

/// Chat-completions client that streams deltas over SSE.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl HttpGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self, VoiceError> {
        if config.base_url.trim().is_empty() {
            return Err(VoiceError::Config(
                "generation.base_url must not be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "stream": true,
            "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
        });
        if let Some(t) = self.config.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = self.config.max_tokens {
            body["max_tokens"] = json!(m);
        }
        body
    }
}

fn message_json(message: &ChatMessage) -> Value {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    };
    match &message.content {
        MessageContent::Text(text) => json!({ "role": role, "content": text }),
        MessageContent::Image {
            bytes,
            mime,
            prompt,
        } => {
            let data_url = format!(
                "data:{};base64,{}",
                mime,
                base64::engine::general_purpose::STANDARD.encode(bytes)
            );
            let mut parts = Vec::new();
            if let Some(prompt) = prompt {
                parts.push(json!({ "type": "text", "text": prompt }));
            }
            parts.push(json!({ "type": "image_url", "image_url": { "url": data_url } }));
            json!({ "role": role, "content": parts })
        }
    }
}

fn is_safety_marker(s: &str) -> bool {
    SAFETY_MARKERS.iter().any(|m| s.contains(m))
}

/// Maps one SSE `data:` payload to generation events.
fn parse_chunk(event: &SseEvent) -> Vec<Result<GenerationEvent, VoiceError>> {
    if event.is_done() {
        return vec![Ok(GenerationEvent::End)];
    }
    let value: Value = match serde_json::from_str(&event.data) {
        Ok(v) => v,
        Err(e) => {
            return vec![Err(VoiceError::Generation(format!(
                "malformed stream chunk: {}",
                e
            )))]
        }
    };
    if let Some(err) = value.get("error") {
        let text = err.to_string();
        return if is_safety_marker(&text) {
            vec![Err(VoiceError::ContentBlocked(text))]
        } else {
            vec![Err(VoiceError::Generation(text))]
        };
    }

    let mut out = Vec::new();
    let choice = &value["choices"][0];
    if let Some(delta) = choice["delta"]["content"].as_str() {
        if !delta.is_empty() {
            out.push(Ok(GenerationEvent::Delta(delta.to_string())));
        }
    }
    if let Some(reason) = choice["finish_reason"].as_str() {
        if is_safety_marker(reason) {
            out.push(Err(VoiceError::ContentBlocked(format!(
                "finish_reason={}",
                reason
            ))));
        } else {
            out.push(Ok(GenerationEvent::End));
        }
    }
    out
}

struct StreamState<S> {
    bytes: S,
    parser: SseLineParser,
    queued: VecDeque<Result<GenerationEvent, VoiceError>>,
    finished: bool,
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<GenerationStream, VoiceError> {
        let mut request = self.client.post(self.endpoint()).json(&self.request_body(&messages));
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VoiceError::Generation(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_safety_marker(&body) {
                return Err(VoiceError::ContentBlocked(body));
            }
            return Err(VoiceError::Generation(format!(
                "generation endpoint returned {}: {}",
                status, body
            )));
        }

        let state = StreamState {
            bytes: response.bytes_stream().boxed(),
            parser: SseLineParser::new(),
            queued: VecDeque::new(),
            finished: false,
        };

        let stream = futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.queued.pop_front() {
                    // Nothing after the end marker or a terminal error.
                    if matches!(item, Ok(GenerationEvent::End) | Err(_)) {
                        state.queued.clear();
                        state.finished = true;
                    }
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        for event in state.parser.push(&chunk) {
                            state.queued.extend(parse_chunk(&event));
                        }
                    }
                    Some(Err(e)) => {
                        state.queued.push_back(Err(VoiceError::Generation(format!(
                            "stream read error: {}",
                            e
                        ))));
                    }
                    None => {
                        if let Some(event) = state.parser.flush() {
                            state.queued.extend(parse_chunk(&event));
                        }
                        // A stream that closes without a marker still ends the answer.
                        state.queued.push_back(Ok(GenerationEvent::End));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
