//! Bounded per-turn delivery queue.
//!
//! The orchestrator is the only producer and the forwarder the only
//! consumer. Capacity bounds memory per turn: a slow client stalls
//! synthesis instead of growing an unbounded backlog.

use cadence_types::{AudioChunk, AudioFormat, ErrorKind, TurnId};
use tokio::sync::mpsc;

/// Default number of chunks a queue holds before `put` waits.
pub const DEFAULT_QUEUE_CAPACITY: usize = 300;

/// The consumer side is gone; nothing more can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delivery queue closed")]
pub struct QueueClosed;

/// Creates a queue for one turn.
pub fn delivery_queue(turn_id: TurnId, capacity: usize) -> (ChunkProducer, ChunkConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChunkProducer {
            turn_id,
            tx,
            next_seq: 1,
        },
        ChunkConsumer { rx, done: false },
    )
}

/// Writing half. Numbers chunks itself so sequence numbers are gap-free.
#[derive(Debug)]
pub struct ChunkProducer {
    turn_id: TurnId,
    tx: mpsc::Sender<AudioChunk>,
    next_seq: i64,
}

impl ChunkProducer {
    pub fn turn_id(&self) -> &TurnId {
        &self.turn_id
    }

    /// Number of chunks put so far (not counting the sentinel).
    pub fn sent(&self) -> u32 {
        (self.next_seq - 1) as u32
    }

    /// Puts an audio chunk, waiting while the queue is full.
    pub async fn put(
        &mut self,
        audio: Vec<u8>,
        format: AudioFormat,
        text: Option<String>,
    ) -> Result<i64, QueueClosed> {
        let seq = self.next_seq;
        let chunk = AudioChunk::audio(self.turn_id.clone(), seq, audio, format, text);
        self.tx.send(chunk).await.map_err(|_| QueueClosed)?;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Puts the error chunk that precedes the sentinel of a failed turn.
    pub async fn put_error(
        &mut self,
        kind: ErrorKind,
        message: String,
    ) -> Result<i64, QueueClosed> {
        let seq = self.next_seq;
        let chunk = AudioChunk::error(self.turn_id.clone(), seq, kind, message);
        self.tx.send(chunk).await.map_err(|_| QueueClosed)?;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Puts the end-of-stream sentinel. Consuming `self` makes a second
    /// sentinel, or a chunk after it, impossible.
    pub async fn finish(self) -> Result<(), QueueClosed> {
        self.tx
            .send(AudioChunk::sentinel(self.turn_id))
            .await
            .map_err(|_| QueueClosed)
    }
}

/// Reading half.
#[derive(Debug)]
pub struct ChunkConsumer {
    rx: mpsc::Receiver<AudioChunk>,
    done: bool,
}

impl ChunkConsumer {
    /// Next chunk in FIFO order. The sentinel is returned once; after it,
    /// or when the producer went away without one, this returns `None`.
    pub async fn get(&mut self) -> Option<AudioChunk> {
        if self.done {
            return None;
        }
        let chunk = self.rx.recv().await;
        match &chunk {
            Some(c) if c.is_sentinel() => self.done = true,
            None => self.done = true,
            _ => {}
        }
        chunk
    }
}
