#![allow(dead_code)]

use async_trait::async_trait;
use cadence_pipeline::{ChunkConsumer, ConversationMemory, Orchestrator, PipelineSettings};
use cadence_types::{AudioChunk, AudioFormat};
use cadence_voice::{
    ChatMessage, GenerationEvent, GenerationStream, Generator, IntentRouter, RouteMatch,
    SynthesizedAudio, Synthesizer, Transcriber, Transcription, VoiceError,
};
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct FakeTranscriber {
    /// `None` makes every call fail.
    pub text: Option<String>,
}

impl FakeTranscriber {
    pub fn hearing(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn broken() -> Self {
        Self { text: None }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        _format: AudioFormat,
    ) -> Result<Transcription, VoiceError> {
        match &self.text {
            Some(text) => Ok(Transcription {
                text: text.clone(),
                confidence: Some(0.9),
                cost: Duration::from_millis(5),
            }),
            None => Err(VoiceError::Stt("engine crashed".into())),
        }
    }
}

pub enum RouterScript {
    Miss,
    Hit(RouteMatch),
    Fail,
    /// Never answers within any reasonable deadline.
    Hang,
}

pub struct FakeRouter {
    script: RouterScript,
    pub calls: AtomicUsize,
}

impl FakeRouter {
    pub fn new(script: RouterScript) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentRouter for FakeRouter {
    async fn route(&self, _text: &str) -> Result<Option<RouteMatch>, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            RouterScript::Miss => Ok(None),
            RouterScript::Hit(hit) => Ok(Some(hit.clone())),
            RouterScript::Fail => Err(VoiceError::Routing("index offline".into())),
            RouterScript::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum GenStep {
    Delta(String),
    End,
    Blocked,
    Fail,
}

pub fn delta(text: &str) -> GenStep {
    GenStep::Delta(text.to_string())
}

fn to_event(step: GenStep) -> Result<GenerationEvent, VoiceError> {
    match step {
        GenStep::Delta(text) => Ok(GenerationEvent::Delta(text)),
        GenStep::End => Ok(GenerationEvent::End),
        GenStep::Blocked => Err(VoiceError::ContentBlocked("content_filter".into())),
        GenStep::Fail => Err(VoiceError::Generation("stream broke".into())),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OpenBehavior {
    Stream,
    Blocked,
    Fail,
}

/// Generator that replays a script, or the steps sent through a gate for
/// its first call.
pub struct FakeGenerator {
    open: OpenBehavior,
    scripted: Vec<GenStep>,
    gate: Mutex<Option<mpsc::UnboundedReceiver<GenStep>>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeGenerator {
    pub fn scripted(steps: Vec<GenStep>) -> Self {
        Self {
            open: OpenBehavior::Stream,
            scripted: steps,
            gate: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Streams `parts` as deltas followed by an explicit end.
    pub fn answering(parts: &[&str]) -> Self {
        let mut steps: Vec<GenStep> = parts.iter().map(|p| delta(p)).collect();
        steps.push(GenStep::End);
        Self::scripted(steps)
    }

    pub fn failing_on_open(open: OpenBehavior) -> Self {
        Self {
            open,
            ..Self::scripted(Vec::new())
        }
    }

    /// The first call streams whatever is sent on the returned sender;
    /// later calls replay `then`.
    pub fn gated(then: &[&str]) -> (Self, mpsc::UnboundedSender<GenStep>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let generator = Self::answering(then);
        *generator.gate.lock().unwrap() = Some(rx);
        (generator, tx)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> Vec<ChatMessage> {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<GenerationStream, VoiceError> {
        self.requests.lock().unwrap().push(messages);
        match self.open {
            OpenBehavior::Blocked => {
                return Err(VoiceError::ContentBlocked("prompt rejected".into()))
            }
            OpenBehavior::Fail => return Err(VoiceError::Generation("HTTP 503".into())),
            OpenBehavior::Stream => {}
        }
        let gate = self.gate.lock().unwrap().take();
        match gate {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|step| (to_event(step), rx))
            })
            .boxed()),
            None => Ok(stream::iter(self.scripted.clone().into_iter().map(to_event)).boxed()),
        }
    }
}

/// Echoes the sentence text back as "audio".
#[derive(Default)]
pub struct FakeSynthesizer {
    pub spoken: Mutex<Vec<String>>,
    /// 1-based call number that fails.
    pub fail_on: Option<usize>,
    pub delay: Option<Duration>,
}

impl FakeSynthesizer {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on: Some(call),
            ..Default::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        format: AudioFormat,
    ) -> Result<SynthesizedAudio, VoiceError> {
        let call = {
            let mut spoken = self.spoken.lock().unwrap();
            spoken.push(text.to_string());
            spoken.len()
        };
        if self.fail_on == Some(call) {
            return Err(VoiceError::Tts("voice unavailable".into()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(SynthesizedAudio {
            audio: text.as_bytes().to_vec(),
            format,
            sample_rate_hz: 22_050,
            cost: Duration::from_millis(1),
        })
    }
}

pub struct Fakes {
    pub transcriber: Arc<FakeTranscriber>,
    pub router: Arc<FakeRouter>,
    pub generator: Arc<FakeGenerator>,
    pub synthesizer: Arc<FakeSynthesizer>,
}

impl Fakes {
    pub fn new(generator: FakeGenerator) -> Self {
        Self {
            transcriber: Arc::new(FakeTranscriber::hearing("hello")),
            router: Arc::new(FakeRouter::new(RouterScript::Miss)),
            generator: Arc::new(generator),
            synthesizer: Arc::new(FakeSynthesizer::default()),
        }
    }

    pub fn with_transcriber(mut self, transcriber: FakeTranscriber) -> Self {
        self.transcriber = Arc::new(transcriber);
        self
    }

    pub fn with_router(mut self, script: RouterScript) -> Self {
        self.router = Arc::new(FakeRouter::new(script));
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: FakeSynthesizer) -> Self {
        self.synthesizer = Arc::new(synthesizer);
        self
    }

    pub fn orchestrator(&self, settings: PipelineSettings) -> Orchestrator {
        Orchestrator::new(
            self.transcriber.clone(),
            self.router.clone(),
            self.generator.clone(),
            self.synthesizer.clone(),
            ConversationMemory::default(),
            settings,
        )
    }
}

/// Drains a consumer up to and including the sentinel.
pub async fn drain(consumer: &mut ChunkConsumer) -> Vec<AudioChunk> {
    let mut chunks = Vec::new();
    while let Some(chunk) = consumer.get().await {
        chunks.push(chunk);
    }
    chunks
}

pub fn texts(chunks: &[AudioChunk]) -> Vec<String> {
    chunks.iter().filter_map(|c| c.text.clone()).collect()
}
