use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::Event;
use crate::store::WalRuleStore;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the WAL once appends since the last compaction pass `threshold`.
pub async fn run_compactor(store: Arc<WalRuleStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if compact_if_due(&store, threshold).await {
            info!(org = store.organization_id(), rules = store.rule_count(), "WAL compacted");
        }
    }
}

/// One compactor tick. True when a compaction ran.
pub async fn compact_if_due(store: &WalRuleStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => true,
        Err(e) => {
            warn!(org = store.organization_id(), error = %e, "WAL compaction failed");
            false
        }
    }
}

/// Rebuild the engine's index whenever a rule changes. Bursts of events
/// collapse into one rebuild. Returns when the hub is dropped.
pub async fn run_refresher(engine: Arc<Engine>, mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
        // Drain what is already queued.
        loop {
            match events.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Closed) => return,
            }
        }
        match engine.reload().await {
            Ok(index) => debug!(org = engine.organization_id(), rules = index.rule_count(), "index refreshed"),
            Err(e) => warn!(org = engine.organization_id(), error = %e, "index refresh failed"),
        }
    }
}
