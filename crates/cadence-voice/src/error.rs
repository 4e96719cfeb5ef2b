use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Generation error: {0}")]
    Generation(String),

    /// The generation service refused to answer on safety grounds.
    #[error("Generation blocked by content safety: {0}")]
    ContentBlocked(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
