//! Drives one turn from user input to a sentinel-terminated chunk stream.
//!
//! The turn moves through `Received → Transcribing → Routing → Generating →
//! Synthesizing` and ends `Complete`, `Failed` or `Cancelled`. Every
//! collaborator failure is turned into a single error chunk; the sentinel
//! is always the last thing put on the queue, whatever happened before it.

use crate::memory::ConversationMemory;
use crate::queue::{ChunkProducer, QueueClosed};
use crate::segmenter::{SentenceSegmenter, DEFAULT_MIN_LENGTH};
use cadence_types::{AudioFormat, ErrorKind, Turn, TurnPayload};
use cadence_voice::{
    wav, CannedAnswer, ChatMessage, ChatRole, GenerationEvent, Generator, IntentRouter,
    MessageContent, Synthesizer, Transcriber, VoiceError,
};
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Spoken instead of an answer the generation service refused to give.
pub const SAFETY_APOLOGY: &str =
    "Sorry, I can't talk about that. Let's chat about something else.";

/// Default routing deadline.
pub const DEFAULT_ROUTING_TIMEOUT: Duration = Duration::from_millis(800);

/// Default minimum router confidence for a canned answer.
pub const DEFAULT_ROUTING_CONFIDENCE: f32 = 0.85;

/// Knobs of the turn state machine.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub system_prompt: String,
    pub min_sentence_length: usize,
    pub routing_timeout: Duration,
    pub routing_confidence_threshold: f32,
    /// Used when a turn does not ask for a specific output format.
    pub default_output_format: AudioFormat,
    pub safety_apology: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            min_sentence_length: DEFAULT_MIN_LENGTH,
            routing_timeout: DEFAULT_ROUTING_TIMEOUT,
            routing_confidence_threshold: DEFAULT_ROUTING_CONFIDENCE,
            default_output_format: AudioFormat::Pcm,
            safety_apology: SAFETY_APOLOGY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    Transcribing,
    Routing,
    Generating,
    Synthesizing,
    Complete,
    Failed,
    Cancelled,
}

impl TurnState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Transcribing => "transcribing",
            Self::Routing => "routing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency milestones of a turn, measured from the start of processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnTimings {
    /// First generation token.
    pub first_token: Option<Duration>,
    /// First chunk put on the delivery queue.
    pub first_audio: Option<Duration>,
    pub total: Duration,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub state: TurnState,
    /// Chunks put before the sentinel, error chunk included.
    pub chunks_sent: u32,
    pub timings: TurnTimings,
    pub error: Option<ErrorKind>,
}

/// Why the happy path stopped early.
enum Stop {
    Failed(ErrorKind, String),
    Cancelled,
    /// Nobody is reading the queue any more.
    Closed,
}

impl From<QueueClosed> for Stop {
    fn from(_: QueueClosed) -> Self {
        Stop::Closed
    }
}

/// A finished exchange worth remembering.
struct Exchange {
    user: String,
    assistant: String,
}

/// Mutable state of one turn while it is being processed.
struct TurnRun<'a> {
    turn: &'a Turn,
    token: CancellationToken,
    producer: ChunkProducer,
    format: AudioFormat,
    started: Instant,
    first_token: Option<Duration>,
    first_audio: Option<Duration>,
    state: TurnState,
    spoken: String,
}

impl TurnRun<'_> {
    fn enter(&mut self, state: TurnState) {
        if self.state == state {
            return;
        }
        tracing::debug!(
            conversation_id = %self.turn.conversation_id,
            turn_id = %self.turn.turn_id,
            from = %self.state,
            to = %state,
            "turn state changed"
        );
        self.state = state;
    }

    fn check_cancelled(&self) -> Result<(), Stop> {
        if self.token.is_cancelled() {
            Err(Stop::Cancelled)
        } else {
            Ok(())
        }
    }

    fn mark_first_token(&mut self) {
        if self.first_token.is_none() {
            self.first_token = Some(self.started.elapsed());
        }
    }

    async fn deliver(
        &mut self,
        audio: Vec<u8>,
        format: AudioFormat,
        text: Option<String>,
    ) -> Result<i64, Stop> {
        let seq = self.producer.put(audio, format, text).await?;
        if self.first_audio.is_none() {
            self.first_audio = Some(self.started.elapsed());
        }
        Ok(seq)
    }
}

/// Composes the collaborators into the per-turn state machine.
#[derive(Clone)]
pub struct Orchestrator {
    transcriber: Arc<dyn Transcriber>,
    router: Arc<dyn IntentRouter>,
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
    memory: ConversationMemory,
    settings: Arc<PipelineSettings>,
}

impl Orchestrator {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        router: Arc<dyn IntentRouter>,
        generator: Arc<dyn Generator>,
        synthesizer: Arc<dyn Synthesizer>,
        memory: ConversationMemory,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            transcriber,
            router,
            generator,
            synthesizer,
            memory,
            settings: Arc::new(settings),
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Processes one turn, writing its chunks to `producer`.
    ///
    /// Never fails: errors become an error chunk, and a dropped consumer
    /// just ends the turn.
    pub async fn process(
        &self,
        turn: &Turn,
        token: CancellationToken,
        producer: ChunkProducer,
    ) -> TurnOutcome {
        let mut run = TurnRun {
            turn,
            token,
            producer,
            format: turn
                .output_format
                .unwrap_or(self.settings.default_output_format),
            started: Instant::now(),
            first_token: None,
            first_audio: None,
            state: TurnState::Received,
            spoken: String::new(),
        };
        tracing::debug!(
            conversation_id = %turn.conversation_id,
            turn_id = %turn.turn_id,
            modality = turn.modality().as_str(),
            "turn received"
        );
        let result = self.drive(&mut run).await;
        self.conclude(run, result).await
    }

    async fn drive(&self, run: &mut TurnRun<'_>) -> Result<Option<Exchange>, Stop> {
        let turn = run.turn;
        run.check_cancelled()?;
        if turn.payload.is_empty() {
            return Err(Stop::Failed(
                ErrorKind::EmptyInput,
                "turn carries no input".to_string(),
            ));
        }

        let user_text = match &turn.payload {
            TurnPayload::Audio(bytes) => {
                run.enter(TurnState::Transcribing);
                let text = self.transcribe(bytes).await?;
                run.check_cancelled()?;
                Some(text)
            }
            TurnPayload::Text(text) => Some(text.trim().to_string()),
            TurnPayload::Image { prompt, .. } => prompt.clone(),
        };

        // Images always go to the model; only plain utterances are routed.
        if !matches!(turn.payload, TurnPayload::Image { .. }) {
            if let Some(text) = &user_text {
                run.enter(TurnState::Routing);
                if let Some(answer) = self.route(run, text).await {
                    return self.answer_canned(run, text, answer).await;
                }
                run.check_cancelled()?;
            }
        }

        run.enter(TurnState::Generating);
        let messages = self.build_messages(turn, user_text.as_deref());
        let mut stream = match self.generator.generate(messages).await {
            Ok(stream) => stream,
            Err(VoiceError::ContentBlocked(reason)) => {
                self.apologize(run, &reason).await?;
                return Ok(None);
            }
            Err(e) => return Err(Stop::Failed(ErrorKind::GenerationFailed, e.to_string())),
        };

        let mut segmenter = SentenceSegmenter::new(self.settings.min_sentence_length);
        // Cancellation is observed in `speak`, once per sentence.
        while let Some(event) = stream.next().await {
            match event {
                Ok(GenerationEvent::Delta(delta)) => {
                    run.mark_first_token();
                    for unit in segmenter.feed(&delta) {
                        self.speak(run, unit).await?;
                    }
                }
                Ok(GenerationEvent::End) => break,
                Err(VoiceError::ContentBlocked(reason)) => {
                    // Whatever the segmenter still holds belongs to the refused answer.
                    drop(segmenter);
                    self.apologize(run, &reason).await?;
                    return Ok(None);
                }
                Err(e) => return Err(Stop::Failed(ErrorKind::GenerationFailed, e.to_string())),
            }
        }
        drop(stream);

        for unit in segmenter.finalize() {
            self.speak(run, unit).await?;
        }

        Ok(user_text.map(|user| Exchange {
            user,
            assistant: run.spoken.clone(),
        }))
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<String, Stop> {
        let format = if wav::is_wav(audio) {
            AudioFormat::Wav
        } else {
            AudioFormat::Pcm
        };
        match self.transcriber.transcribe(audio, format).await {
            Ok(transcription) => {
                let text = transcription.text.trim();
                if text.is_empty() {
                    return Err(Stop::Failed(
                        ErrorKind::NoSpeechDetected,
                        "no speech detected".to_string(),
                    ));
                }
                tracing::debug!(
                    cost_ms = transcription.cost.as_millis() as u64,
                    confidence = ?transcription.confidence,
                    "transcription finished"
                );
                Ok(text.to_string())
            }
            Err(e) => Err(Stop::Failed(ErrorKind::TranscriptionFailed, e.to_string())),
        }
    }

    /// Returns a canned answer when the router is confident enough. Any
    /// routing problem falls through to generation.
    async fn route(&self, run: &TurnRun<'_>, text: &str) -> Option<CannedAnswer> {
        let timeout = self.settings.routing_timeout;
        match tokio::time::timeout(timeout, self.router.route(text)).await {
            Ok(Ok(Some(hit))) if hit.confidence >= self.settings.routing_confidence_threshold => {
                tracing::info!(
                    conversation_id = %run.turn.conversation_id,
                    turn_id = %run.turn.turn_id,
                    category = %hit.category,
                    confidence = hit.confidence,
                    "answering from intent table"
                );
                Some(hit.answer)
            }
            Ok(Ok(Some(hit))) => {
                tracing::debug!(
                    category = %hit.category,
                    confidence = hit.confidence,
                    "intent match below threshold"
                );
                None
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::warn!(
                    conversation_id = %run.turn.conversation_id,
                    turn_id = %run.turn.turn_id,
                    error_kind = %ErrorKind::RoutingTimeout,
                    error = %e,
                    "routing failed, falling through to generation"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    conversation_id = %run.turn.conversation_id,
                    turn_id = %run.turn.turn_id,
                    error_kind = %ErrorKind::RoutingTimeout,
                    timeout_ms = timeout.as_millis() as u64,
                    "routing timed out, falling through to generation"
                );
                None
            }
        }
    }

    async fn answer_canned(
        &self,
        run: &mut TurnRun<'_>,
        user: &str,
        answer: CannedAnswer,
    ) -> Result<Option<Exchange>, Stop> {
        match answer {
            CannedAnswer::Audio { bytes, format } => {
                run.check_cancelled()?;
                run.deliver(bytes, format, None).await?;
                Ok(None)
            }
            CannedAnswer::Text(text) => {
                self.speak(run, text.clone()).await?;
                Ok(Some(Exchange {
                    user: user.to_string(),
                    assistant: text,
                }))
            }
        }
    }

    async fn apologize(&self, run: &mut TurnRun<'_>, reason: &str) -> Result<(), Stop> {
        tracing::info!(
            conversation_id = %run.turn.conversation_id,
            turn_id = %run.turn.turn_id,
            error_kind = %ErrorKind::ContentSafetyBlocked,
            reason = %reason,
            "generation refused, answering with apology"
        );
        self.speak(run, self.settings.safety_apology.clone()).await
    }

    /// Synthesizes one sentence and queues it. Cancellation is checked here
    /// and nowhere inside the synthesis call.
    async fn speak(&self, run: &mut TurnRun<'_>, text: String) -> Result<(), Stop> {
        run.check_cancelled()?;
        run.enter(TurnState::Synthesizing);
        let audio = self
            .synthesizer
            .synthesize(&text, run.format)
            .await
            .map_err(|e| Stop::Failed(ErrorKind::SynthesisFailed, e.to_string()))?;
        let cost_ms = audio.cost.as_millis() as u64;
        run.spoken.push_str(&text);
        let seq = run.deliver(audio.audio, audio.format, Some(text)).await?;
        tracing::debug!(
            conversation_id = %run.turn.conversation_id,
            turn_id = %run.turn.turn_id,
            stream_seq = seq,
            cost_ms,
            "sentence queued"
        );
        Ok(())
    }

    fn build_messages(&self, turn: &Turn, user_text: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if !self.settings.system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(self.settings.system_prompt.clone()));
        }
        messages.extend(self.memory.recent(&turn.conversation_id));
        let current = match &turn.payload {
            TurnPayload::Image {
                bytes,
                mime,
                prompt,
            } => ChatMessage {
                role: ChatRole::User,
                content: MessageContent::Image {
                    bytes: bytes.clone(),
                    mime: mime.clone(),
                    prompt: prompt.clone(),
                },
            },
            _ => ChatMessage::user(user_text.unwrap_or_default()),
        };
        messages.push(current);
        messages
    }

    async fn conclude(
        &self,
        run: TurnRun<'_>,
        result: Result<Option<Exchange>, Stop>,
    ) -> TurnOutcome {
        let TurnRun {
            turn,
            mut producer,
            started,
            first_token,
            first_audio,
            state: last_state,
            ..
        } = run;

        let mut closed = false;
        let (state, error) = match result {
            Ok(exchange) => {
                if let Some(exchange) = exchange {
                    if !exchange.assistant.is_empty() {
                        self.memory.remember(
                            &turn.conversation_id,
                            ChatMessage::user(exchange.user),
                            ChatMessage::assistant(exchange.assistant),
                        );
                    }
                }
                (TurnState::Complete, None)
            }
            Err(Stop::Failed(kind, message)) => {
                tracing::warn!(
                    conversation_id = %turn.conversation_id,
                    turn_id = %turn.turn_id,
                    during = %last_state,
                    error_kind = %kind,
                    error = %message,
                    "turn failed"
                );
                closed = producer.put_error(kind, message).await.is_err();
                (TurnState::Failed, Some(kind))
            }
            Err(Stop::Cancelled) => {
                tracing::info!(
                    conversation_id = %turn.conversation_id,
                    turn_id = %turn.turn_id,
                    during = %last_state,
                    "turn cancelled"
                );
                (TurnState::Cancelled, Some(ErrorKind::Cancelled))
            }
            Err(Stop::Closed) => {
                tracing::debug!(
                    conversation_id = %turn.conversation_id,
                    turn_id = %turn.turn_id,
                    "delivery queue closed, stopping turn"
                );
                closed = true;
                (TurnState::Cancelled, Some(ErrorKind::Cancelled))
            }
        };

        let chunks_sent = producer.sent();
        if !closed && producer.finish().await.is_err() {
            tracing::debug!(turn_id = %turn.turn_id, "consumer gone before sentinel");
        }

        let timings = TurnTimings {
            first_token,
            first_audio,
            total: started.elapsed(),
        };
        tracing::info!(
            conversation_id = %turn.conversation_id,
            turn_id = %turn.turn_id,
            state = %state,
            chunks_sent,
            first_token_ms = ?timings.first_token.map(|d| d.as_millis() as u64),
            first_audio_ms = ?timings.first_audio.map(|d| d.as_millis() as u64),
            total_ms = timings.total.as_millis() as u64,
            "turn finished"
        );

        TurnOutcome {
            state,
            chunks_sent,
            timings,
            error,
        }
    }
}
