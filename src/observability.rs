use tracing_subscriber::EnvFilter;

// ── Index metrics ───────────────────────────────────────────────

/// Counter: rule index rebuilds.
pub const INDEX_BUILDS_TOTAL: &str = "staycal_index_builds_total";

/// Histogram: index build time in seconds.
pub const INDEX_BUILD_DURATION_SECONDS: &str = "staycal_index_build_duration_seconds";

/// Gauge: rule-days materialized by the latest build. Labels: org.
pub const INDEX_RULE_DAYS: &str = "staycal_index_rule_days";

// ── Calendar outcomes ───────────────────────────────────────────

/// Counter: overbooked (property, day) pairs reported.
pub const CONFLICTS_DETECTED_TOTAL: &str = "staycal_conflicts_detected_total";

/// Counter: bulk-apply ops. Labels: status (ok, failed).
pub const BULK_OPS_TOTAL: &str = "staycal_bulk_ops_total";

/// Counter: store calls retried after a transport error. Labels: op.
pub const STORE_RETRIES_TOTAL: &str = "staycal_store_retries_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staycal_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staycal_wal_flush_batch_size";

/// Gauge: organizations with a loaded engine.
pub const ORGANIZATIONS_ACTIVE: &str = "staycal_organizations_active";

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
