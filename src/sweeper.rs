use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::model::now_ms;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that marks pending assignments absent once their exam
/// window is over without a check-in. The first sweep runs one full
/// interval after startup.
pub async fn run_absence_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match engine.run_absence_sweep(now_ms()).await {
            Ok(updated) if updated.is_empty() => debug!("absence sweep: nothing due"),
            Ok(_) => {}
            Err(e) => error!("absence sweep failed: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => error!("WAL compaction failed: {e}"),
        }
    }
}
