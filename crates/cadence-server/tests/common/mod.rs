#![allow(dead_code)]

use async_trait::async_trait;
use cadence_pipeline::{
    CancellationRegistry, ConversationMemory, LatestTurnArbiter, Orchestrator, PipelineSettings,
    TurnDispatcher,
};
use cadence_server::{app, AppState};
use cadence_types::AudioFormat;
use cadence_voice::{
    ChatMessage, GenerationEvent, GenerationStream, Generator, IntentRouter, RouteMatch,
    SynthesizedAudio, Synthesizer, Transcriber, Transcription, VoiceError,
};
use futures_util::stream::{self, StreamExt};
use futures_util::SinkExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct EchoTranscriber;

#[async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        _format: AudioFormat,
    ) -> Result<Transcription, VoiceError> {
        Ok(Transcription {
            text: String::from_utf8_lossy(audio).into_owned(),
            confidence: None,
            cost: Duration::from_millis(1),
        })
    }
}

pub struct NoRoutes;

#[async_trait]
impl IntentRouter for NoRoutes {
    async fn route(&self, _text: &str) -> Result<Option<RouteMatch>, VoiceError> {
        Ok(None)
    }
}

/// How long a stalling reply holds before its model speaks again.
pub const STALL_PAUSE: Duration = Duration::from_millis(250);

/// Sentence a stalling reply produces once its pause is over.
pub const STALL_RESUME: &str = " Still thinking.";

/// What one generation call produces.
#[derive(Clone)]
pub enum Reply {
    /// Streams the parts, then ends.
    Answer(Vec<String>),
    /// Streams the parts, goes quiet for the pause, then speaks one more
    /// sentence and ends.
    Stall(Vec<String>, Duration),
}

impl Reply {
    pub fn answer(parts: &[&str]) -> Self {
        Self::Answer(parts.iter().map(|p| p.to_string()).collect())
    }

    pub fn stall(parts: &[&str]) -> Self {
        Self::stall_for(parts, STALL_PAUSE)
    }

    pub fn stall_for(parts: &[&str], pause: Duration) -> Self {
        Self::Stall(parts.iter().map(|p| p.to_string()).collect(), pause)
    }
}

/// Plays queued replies in call order, then keeps repeating the fallback.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback,
        }
    }

    pub fn always(parts: &[&str]) -> Self {
        Self::new(Vec::new(), Reply::answer(parts))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _messages: Vec<ChatMessage>) -> Result<GenerationStream, VoiceError> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let deltas = |parts: Vec<String>| {
            stream::iter(
                parts
                    .into_iter()
                    .map(|p| Ok::<_, VoiceError>(GenerationEvent::Delta(p))),
            )
        };
        Ok(match reply {
            Reply::Answer(parts) => deltas(parts)
                .chain(stream::once(async { Ok(GenerationEvent::End) }))
                .boxed(),
            Reply::Stall(parts, pause) => deltas(parts)
                .chain(stream::once(async move {
                    tokio::time::sleep(pause).await;
                    Ok(GenerationEvent::Delta(STALL_RESUME.to_string()))
                }))
                .chain(stream::once(async { Ok(GenerationEvent::End) }))
                .boxed(),
        })
    }
}

/// Echoes the sentence text back as "audio".
pub struct EchoSynthesizer;

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        format: AudioFormat,
    ) -> Result<SynthesizedAudio, VoiceError> {
        Ok(SynthesizedAudio {
            audio: text.as_bytes().to_vec(),
            format,
            sample_rate_hz: 16_000,
            cost: Duration::from_millis(1),
        })
    }
}

pub fn test_state(generator: ScriptedGenerator) -> AppState {
    let orchestrator = Orchestrator::new(
        Arc::new(EchoTranscriber),
        Arc::new(NoRoutes),
        Arc::new(generator),
        Arc::new(EchoSynthesizer),
        ConversationMemory::default(),
        PipelineSettings::default(),
    );
    AppState::new(TurnDispatcher::new(
        orchestrator,
        CancellationRegistry::new(),
        LatestTurnArbiter::new(),
    ))
}

/// Serves `state` on an ephemeral port and returns its address.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("failed to connect");
    ws
}

pub async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("failed to send");
}

/// Next text frame as JSON, failing the test after five seconds.
pub async fn recv_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is not json");
        }
    }
}

/// Frames up to and including the sentinel of one turn.
pub async fn recv_turn(ws: &mut Client) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = recv_json(ws).await;
        let done = frame["data"]["stream_seq"] == -1;
        frames.push(frame);
        if done {
            return frames;
        }
    }
}
