//! Latest-turn-wins bookkeeping per conversation.

use cadence_types::{ConversationId, TurnId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Default idle time after which a conversation's entry is evicted (6 hours).
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug)]
struct LatestEntry {
    turn_id: TurnId,
    touched_at: Instant,
}

/// Tracks the newest turn id seen for every conversation.
///
/// The recorded id only ever moves forward: recording an older turn id
/// leaves the entry unchanged, so a late-arriving old turn can never make
/// a newer one look stale.
#[derive(Clone, Debug, Default)]
pub struct LatestTurnArbiter {
    latest: Arc<Mutex<HashMap<ConversationId, LatestEntry>>>,
}

impl LatestTurnArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, LatestEntry>> {
        match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("turn arbiter lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Records `turn_id` for its conversation. Returns whether it is now the
    /// latest turn (it is newer than, or equal to, everything seen so far).
    pub fn record(&self, conversation_id: &ConversationId, turn_id: &TurnId) -> bool {
        let mut latest = self.lock();
        let now = Instant::now();
        match latest.get_mut(conversation_id) {
            Some(entry) => {
                entry.touched_at = now;
                if *turn_id >= entry.turn_id {
                    entry.turn_id = turn_id.clone();
                    true
                } else {
                    false
                }
            }
            None => {
                latest.insert(
                    conversation_id.clone(),
                    LatestEntry {
                        turn_id: turn_id.clone(),
                        touched_at: now,
                    },
                );
                true
            }
        }
    }

    /// Whether `turn_id` is still the latest turn of its conversation.
    /// Unknown conversations (never recorded, or evicted) count as latest.
    pub fn is_latest(&self, conversation_id: &ConversationId, turn_id: &TurnId) -> bool {
        self.lock()
            .get(conversation_id)
            .map_or(true, |entry| entry.turn_id == *turn_id)
    }

    pub fn latest(&self, conversation_id: &ConversationId) -> Option<TurnId> {
        self.lock()
            .get(conversation_id)
            .map(|entry| entry.turn_id.clone())
    }

    /// Drops conversations idle for longer than `ttl`. Returns how many
    /// entries were removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut latest = self.lock();
        let before = latest.len();
        let now = Instant::now();
        latest.retain(|_, entry| now.duration_since(entry.touched_at) <= ttl);
        before - latest.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
