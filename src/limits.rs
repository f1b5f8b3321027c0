// ── Hard limits ──────────────────────────────────────────────────

/// Longest range a single rule may span.
pub const MAX_RULE_SPAN_DAYS: i64 = 3_660;

/// Widest window for conflict reports and calendar grids.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3_660;

/// Most ops in one bulk apply.
pub const MAX_BATCH_SIZE: usize = 500;

pub const MAX_RULES_PER_ORG: usize = 500_000;

/// Most (scope, day) entries a single index build may materialize.
pub const MAX_INDEXED_RULE_DAYS: usize = 5_000_000;

pub const MAX_ORGANIZATIONS: usize = 1_024;

pub const MAX_ORG_NAME_LEN: usize = 256;

/// Ids, reasons, notes, platform tags.
pub const MAX_TEXT_LEN: usize = 1_024;

pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Largest encoded WAL record. A full bulk batch stays well below this.
pub const MAX_WAL_FRAME_LEN: usize = 16 * 1024 * 1024;
