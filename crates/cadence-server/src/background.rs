//! Background tasks for the Cadence server.
//!
//! Includes:
//! - Sweeping idle conversations out of the turn arbiter and memory.

use cadence_pipeline::{CancellationToken, ConversationMemory, LatestTurnArbiter};
use tokio::time::{sleep, Duration};

/// Starts the idle-conversation sweep.
///
/// Every `interval` the task evicts conversations that have not seen a turn
/// for longer than `ttl`. It returns when `shutdown` is cancelled.
pub async fn start_sweep_task(
    arbiter: LatestTurnArbiter,
    memory: ConversationMemory,
    interval: Duration,
    ttl: Duration,
    shutdown: CancellationToken,
) {
    if interval.is_zero() {
        tracing::warn!("conversation sweep disabled (interval=0)");
        return;
    }

    tracing::info!(
        interval_secs = interval.as_secs(),
        ttl_secs = ttl.as_secs(),
        "starting conversation sweep task"
    );

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("conversation sweep task stopped");
                return;
            }
            () = sleep(interval) => {}
        }

        let evicted = arbiter.evict_idle(ttl);
        let forgotten = memory.evict_idle(ttl);
        if evicted > 0 || forgotten > 0 {
            tracing::info!(
                evicted,
                forgotten,
                remaining = arbiter.len(),
                "swept idle conversations"
            );
        }
    }
}
