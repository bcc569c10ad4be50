use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::{Engine, EngineError, ReservationStore, now_local};

/// How often the compactor checks the append counter.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that periodically applies the retention sweep, so expired
/// reservations go away even when nobody lists.
pub async fn run_sweeper<S: ReservationStore>(engine: Arc<Engine<S>>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match engine.sweep_expired(now_local()).await {
            Ok(0) => debug!("sweep: nothing expired"),
            Ok(removed) => info!(removed, "swept expired reservations"),
            Err(e) => error!(error = %e, "retention sweep failed"),
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor<S: ReservationStore>(engine: Arc<Engine<S>>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            error!(error = %e, "WAL compaction failed");
        }
    }
}

/// Compact when the append counter has reached `threshold`. Returns whether
/// a compaction ran.
pub async fn compact_if_due<S: ReservationStore>(
    engine: &Engine<S>,
    threshold: u64,
) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    debug!(appends, threshold, "compaction due");
    engine.compact_wal().await?;
    Ok(true)
}
