//! Per-turn cancellation flags.

use cadence_types::{ConversationId, TurnId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Turn ids are chosen by clients and only ordered within a conversation,
/// so a live turn is identified by both.
type TurnKey = (ConversationId, TurnId);
type Entries = HashMap<TurnKey, CancellationToken>;

/// Result of cancelling by turn id alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnLookup {
    Cancelled(ConversationId),
    NotFound,
    /// More than one conversation has a live turn with this id; none was
    /// cancelled.
    Ambiguous,
}

/// Shared map from (conversation, turn) to the turn's cancellation token.
///
/// Tokens are monotonic: once cancelled they stay cancelled. Every turn
/// that is registered is unregistered by its orchestrator when it ends.
#[derive(Clone, Debug, Default)]
pub struct CancellationRegistry {
    entries: Arc<Mutex<Entries>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("cancellation registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn key(conversation_id: &ConversationId, turn_id: &TurnId) -> TurnKey {
        (conversation_id.clone(), turn_id.clone())
    }

    /// Registers a turn and returns its token. Registering a turn that is
    /// already live returns the existing token.
    pub fn register(
        &self,
        conversation_id: &ConversationId,
        turn_id: &TurnId,
    ) -> CancellationToken {
        self.lock()
            .entry(Self::key(conversation_id, turn_id))
            .or_default()
            .clone()
    }

    /// Registers a turn only if it is not live yet.
    pub fn try_register(
        &self,
        conversation_id: &ConversationId,
        turn_id: &TurnId,
    ) -> Option<CancellationToken> {
        let mut entries = self.lock();
        let key = Self::key(conversation_id, turn_id);
        if entries.contains_key(&key) {
            return None;
        }
        let token = CancellationToken::new();
        entries.insert(key, token.clone());
        Some(token)
    }

    /// Signals cancellation. Returns `false` if the turn is not registered.
    pub fn cancel(&self, conversation_id: &ConversationId, turn_id: &TurnId) -> bool {
        match self.lock().get(&Self::key(conversation_id, turn_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels the live turn with `turn_id` when exactly one conversation
    /// has one.
    pub fn cancel_turn(&self, turn_id: &TurnId) -> TurnLookup {
        let entries = self.lock();
        let mut matches = entries.iter().filter(|((_, id), _)| id == turn_id);
        match (matches.next(), matches.next()) {
            (None, _) => TurnLookup::NotFound,
            (Some(((conversation_id, _), token)), None) => {
                token.cancel();
                TurnLookup::Cancelled(conversation_id.clone())
            }
            (Some(_), Some(_)) => TurnLookup::Ambiguous,
        }
    }

    /// Cancels every live turn of `conversation_id` that is older than
    /// `newer`. Returns the ids that were cancelled.
    pub fn cancel_superseded(
        &self,
        conversation_id: &ConversationId,
        newer: &TurnId,
    ) -> Vec<TurnId> {
        let entries = self.lock();
        let mut cancelled = Vec::new();
        for ((conv, turn_id), token) in entries.iter() {
            if conv == conversation_id && turn_id < newer && !token.is_cancelled() {
                token.cancel();
                cancelled.push(turn_id.clone());
            }
        }
        cancelled
    }

    pub fn is_cancelled(&self, conversation_id: &ConversationId, turn_id: &TurnId) -> bool {
        self.lock()
            .get(&Self::key(conversation_id, turn_id))
            .is_some_and(CancellationToken::is_cancelled)
    }

    pub fn unregister(&self, conversation_id: &ConversationId, turn_id: &TurnId) {
        self.lock().remove(&Self::key(conversation_id, turn_id));
    }

    pub fn contains(&self, conversation_id: &ConversationId, turn_id: &TurnId) -> bool {
        self.lock().contains_key(&Self::key(conversation_id, turn_id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
