//! Turn orchestration for the Cadence voice pipeline.
//!
//! A turn is dispatched by [`TurnDispatcher`], processed by
//! [`Orchestrator`] and delivered through a bounded per-turn queue. The
//! model's token stream is cut into speakable units by
//! [`SentenceSegmenter`] so synthesis can start before generation ends.
//! [`CancellationRegistry`] and [`LatestTurnArbiter`] are the only state
//! shared between turns.

pub mod arbiter;
pub mod cancel;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod segmenter;

pub use arbiter::LatestTurnArbiter;
pub use cancel::{CancellationRegistry, TurnLookup};
pub use dispatcher::{TurnDispatcher, TurnHandle};
pub use error::PipelineError;
pub use memory::ConversationMemory;
pub use orchestrator::{
    Orchestrator, PipelineSettings, TurnOutcome, TurnState, TurnTimings, SAFETY_APOLOGY,
};
pub use queue::{delivery_queue, ChunkConsumer, ChunkProducer, QueueClosed};
pub use segmenter::SentenceSegmenter;
pub use tokio_util::sync::CancellationToken;
