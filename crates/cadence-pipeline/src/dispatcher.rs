//! Accept side of the pipeline: turns an incoming `Turn` into a running
//! orchestrator task and the queue its chunks arrive on.

use crate::arbiter::LatestTurnArbiter;
use crate::cancel::{CancellationRegistry, TurnLookup};
use crate::error::PipelineError;
use crate::orchestrator::{Orchestrator, TurnOutcome};
use crate::queue::{delivery_queue, ChunkConsumer, DEFAULT_QUEUE_CAPACITY};
use cadence_types::{ConversationId, Turn, TurnId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A dispatched turn.
#[derive(Debug)]
pub struct TurnHandle {
    pub conversation_id: ConversationId,
    pub turn_id: TurnId,
    pub consumer: ChunkConsumer,
    pub task: JoinHandle<TurnOutcome>,
}

#[derive(Clone)]
pub struct TurnDispatcher {
    orchestrator: Orchestrator,
    registry: CancellationRegistry,
    arbiter: LatestTurnArbiter,
    queue_capacity: usize,
}

impl TurnDispatcher {
    pub fn new(
        orchestrator: Orchestrator,
        registry: CancellationRegistry,
        arbiter: LatestTurnArbiter,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            arbiter,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    pub fn arbiter(&self) -> &LatestTurnArbiter {
        &self.arbiter
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Starts processing `turn`.
    ///
    /// Older in-flight turns of the same conversation are cancelled before
    /// the new one is spawned. A turn that is already older than the
    /// conversation's latest is refused with [`PipelineError::Stale`].
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, turn: Turn) -> Result<TurnHandle, PipelineError> {
        let conversation_id = turn.conversation_id.clone();
        let turn_id = turn.turn_id.clone();

        if !self.arbiter.record(&conversation_id, &turn_id) {
            return Err(PipelineError::Stale {
                conversation_id,
                turn_id,
            });
        }

        let superseded = self.registry.cancel_superseded(&conversation_id, &turn_id);
        if !superseded.is_empty() {
            tracing::debug!(
                conversation_id = %conversation_id,
                turn_id = %turn_id,
                superseded = ?superseded,
                "cancelled older turns"
            );
        }

        let token = self.claim(&conversation_id, &turn_id)?;

        let (producer, consumer) = delivery_queue(turn_id.clone(), self.queue_capacity);
        let orchestrator = self.orchestrator.clone();
        let registry = self.registry.clone();
        let task = tokio::spawn(async move {
            let outcome = orchestrator.process(&turn, token, producer).await;
            registry.unregister(&turn.conversation_id, &turn.turn_id);
            outcome
        });

        Ok(TurnHandle {
            conversation_id,
            turn_id,
            consumer,
            task,
        })
    }

    /// Registers the turn's token, then confirms it is still the latest.
    ///
    /// A newer turn may be recorded, and its supersede pass run, between
    /// this turn's arbiter record and its registration; such a turn is
    /// withdrawn as stale instead of running uncancelled.
    fn claim(
        &self,
        conversation_id: &ConversationId,
        turn_id: &TurnId,
    ) -> Result<CancellationToken, PipelineError> {
        let token = self
            .registry
            .try_register(conversation_id, turn_id)
            .ok_or_else(|| PipelineError::DuplicateTurn(turn_id.clone()))?;
        if !self.arbiter.is_latest(conversation_id, turn_id) {
            self.registry.unregister(conversation_id, turn_id);
            return Err(PipelineError::Stale {
                conversation_id: conversation_id.clone(),
                turn_id: turn_id.clone(),
            });
        }
        Ok(token)
    }

    /// Explicit cancel. Returns `false` if the turn is not in flight.
    pub fn cancel(&self, conversation_id: &ConversationId, turn_id: &TurnId) -> bool {
        let found = self.registry.cancel(conversation_id, turn_id);
        tracing::debug!(
            conversation_id = %conversation_id,
            turn_id = %turn_id,
            found,
            "cancel requested"
        );
        found
    }

    /// Cancel by turn id alone, for callers that do not know the
    /// conversation. Refuses ids that are live in several conversations.
    pub fn cancel_turn(&self, turn_id: &TurnId) -> TurnLookup {
        let lookup = self.registry.cancel_turn(turn_id);
        tracing::debug!(turn_id = %turn_id, lookup = ?lookup, "cancel requested");
        lookup
    }
}
