//! Short in-process memory of recent exchanges per conversation.
//!
//! Only completed turns are remembered. Nothing here survives a restart;
//! entries idle for longer than the conversation TTL are evicted by the
//! same sweep that trims the turn arbiter.

use cadence_types::ConversationId;
use cadence_voice::ChatMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Default number of messages (user and assistant) kept per conversation.
pub const DEFAULT_MEMORY_WINDOW: usize = 12;

#[derive(Debug)]
struct History {
    messages: VecDeque<ChatMessage>,
    touched_at: Instant,
}

#[derive(Clone, Debug)]
pub struct ConversationMemory {
    window: usize,
    histories: Arc<Mutex<HashMap<ConversationId, History>>>,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_WINDOW)
    }
}

impl ConversationMemory {
    /// A `window` of zero disables memory.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            histories: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, History>> {
        match self.histories.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("conversation memory lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Recent messages of a conversation, oldest first.
    pub fn recent(&self, conversation_id: &ConversationId) -> Vec<ChatMessage> {
        self.lock()
            .get(conversation_id)
            .map(|h| h.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Appends one completed exchange, dropping the oldest messages beyond
    /// the window.
    pub fn remember(
        &self,
        conversation_id: &ConversationId,
        user: ChatMessage,
        assistant: ChatMessage,
    ) {
        if self.window == 0 {
            return;
        }
        let mut histories = self.lock();
        let history = histories
            .entry(conversation_id.clone())
            .or_insert_with(|| History {
                messages: VecDeque::new(),
                touched_at: Instant::now(),
            });
        history.messages.push_back(user);
        history.messages.push_back(assistant);
        while history.messages.len() > self.window {
            history.messages.pop_front();
        }
        history.touched_at = Instant::now();
    }

    pub fn forget(&self, conversation_id: &ConversationId) {
        self.lock().remove(conversation_id);
    }

    /// Drops conversations idle for longer than `ttl`. Returns how many
    /// were removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut histories = self.lock();
        let before = histories.len();
        let now = Instant::now();
        histories.retain(|_, h| now.duration_since(h.touched_at) <= ttl);
        before - histories.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
