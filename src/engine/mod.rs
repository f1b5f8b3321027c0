mod bulk;
mod error;
pub mod index;
pub mod interval;
mod occupancy;
mod resolve;

pub use bulk::{plan_bulk_upsert, BulkTarget};
pub use error::EngineError;
pub use index::RuleIndex;
pub use occupancy::{adjacency, all_occupants_for, conflicts_in_range, has_conflict, occupant_for};
pub use resolve::resolve;

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{BookingSource, RuleStore};

/// Index plus the window it was built for. Swapped whole on refresh.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    index: Arc<RuleIndex>,
    window: Option<DateRange>,
    /// Refresh request that built this snapshot. 0 until the first build.
    generation: u64,
}

/// The newest refresh asked for. Reloads reuse its window.
#[derive(Debug, Clone, Copy, Default)]
struct RefreshRequest {
    generation: u64,
    window: Option<DateRange>,
}

impl Snapshot {
    fn is_loaded(&self) -> bool {
        self.generation > 0
    }

    fn ensure_covers(&self, range: &DateRange) -> Result<(), EngineError> {
        match self.window {
            Some(w) if range.start < w.start || range.end > w.end => Err(EngineError::OutsideWindow {
                start: range.start,
                end: range.end,
            }),
            _ => Ok(()),
        }
    }
}

fn check_query_range(range: &DateRange) -> Result<(), EngineError> {
    DateRange::new(range.start, range.end)?;
    if range.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Per-organization calendar engine.
///
/// Resolution runs against an immutable [`RuleIndex`] snapshot; writes go
/// through the rule store and end with a rebuild-and-swap.
pub struct Engine {
    organization_id: String,
    store: Arc<dyn RuleStore>,
    bookings: Arc<dyn BookingSource>,
    retry: RetryPolicy,
    current: RwLock<Snapshot>,
    /// Only a build from a newer request may replace `current`.
    latest: Mutex<RefreshRequest>,
}

impl Engine {
    pub fn new(organization_id: &str, store: Arc<dyn RuleStore>, bookings: Arc<dyn BookingSource>) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            store,
            bookings,
            retry: RetryPolicy::default(),
            current: RwLock::new(Snapshot::default()),
            latest: Mutex::new(RefreshRequest::default()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    // ── Index lifecycle ──────────────────────────────────────

    /// Fetch the rules intersecting `window` (all rules when `None`), build a
    /// fresh index and swap it in.
    ///
    /// Overlapping refreshes resolve by request order: a build that finishes
    /// after a newer one has already been swapped in is dropped, and the
    /// newer index is returned.
    pub async fn refresh(&self, window: Option<DateRange>) -> Result<Arc<RuleIndex>, EngineError> {
        if let Some(w) = &window {
            check_query_range(w)?;
        }
        let request = self.next_request(Some(window)).await;
        self.rebuild(request).await
    }

    /// Rebuild for the most recently requested window. Before the first
    /// refresh there is none, so every rule is loaded.
    pub async fn reload(&self) -> Result<Arc<RuleIndex>, EngineError> {
        let request = self.next_request(None).await;
        self.rebuild(request).await
    }

    /// Hand out the next generation, switching windows when one is given.
    async fn next_request(&self, window: Option<Option<DateRange>>) -> RefreshRequest {
        let mut latest = self.latest.lock().await;
        latest.generation += 1;
        if let Some(w) = window {
            latest.window = w;
        }
        *latest
    }

    async fn rebuild(&self, request: RefreshRequest) -> Result<Arc<RuleIndex>, EngineError> {
        let RefreshRequest { generation, window } = request;
        let org = self.organization_id.as_str();
        let rules = with_retry(&self.retry, "list_rules", || self.store.list_rules(org, window)).await?;
        if rules.len() > MAX_RULES_PER_ORG {
            return Err(EngineError::LimitExceeded("too many rules in organization"));
        }

        let started = Instant::now();
        let index = Arc::new(RuleIndex::build_within(rules, window.as_ref())?);
        let elapsed = started.elapsed();

        metrics::counter!(crate::observability::INDEX_BUILDS_TOTAL).increment(1);
        metrics::histogram!(crate::observability::INDEX_BUILD_DURATION_SECONDS).record(elapsed.as_secs_f64());
        metrics::gauge!(crate::observability::INDEX_RULE_DAYS, "org" => self.organization_id.clone())
            .set(index.rule_days() as f64);
        info!(
            org,
            rules = index.rule_count(),
            rule_days = index.rule_days(),
            elapsed_us = elapsed.as_micros() as u64,
            "rule index rebuilt"
        );

        let mut current = self.current.write().await;
        if current.generation > generation {
            debug!(org, generation, newer = current.generation, "stale rule index dropped");
            return Ok(current.index.clone());
        }
        *current = Snapshot {
            index: index.clone(),
            window,
            generation,
        };
        Ok(index)
    }

    /// The index currently in use. Empty until the first refresh.
    pub async fn snapshot(&self) -> Arc<RuleIndex> {
        self.current.read().await.index.clone()
    }

    /// Current snapshot, built first if the engine has never been
    /// refreshed. Queries never run against the unbuilt empty index.
    async fn loaded_snapshot(&self) -> Result<Snapshot, EngineError> {
        let snap = self.current.read().await.clone();
        if snap.is_loaded() {
            return Ok(snap);
        }
        self.reload().await?;
        Ok(self.current.read().await.clone())
    }

    /// Creates carry no id, so a resend after a lost reply would store the
    /// rule twice. Only batches of updates by id are retried.
    fn write_policy<'a>(&self, mut drafts: impl Iterator<Item = &'a RuleDraft>) -> RetryPolicy {
        if drafts.all(|d| d.id.is_some()) {
            self.retry.clone()
        } else {
            RetryPolicy::none()
        }
    }

    pub async fn window(&self) -> Option<DateRange> {
        self.current.read().await.window
    }

    // ── Caller API ───────────────────────────────────────────

    pub async fn resolve_effective_rule(
        &self,
        property_id: &str,
        day: Day,
        prefer_batch: bool,
    ) -> Result<ResolvedRule, EngineError> {
        let snap = self.loaded_snapshot().await?;
        snap.ensure_covers(&DateRange {
            start: day,
            end: interval::next_day(day),
        })?;
        Ok(ResolvedRule::from_rule(resolve(&snap.index, property_id, day, prefer_batch)))
    }

    pub async fn resolve_occupancy(&self, property_id: &str, day: Day) -> Result<Option<Occupant>, EngineError> {
        let (reservations, blocks) = self.load_bookings(property_id).await?;
        Ok(occupant_for(property_id, day, &reservations, &blocks))
    }

    /// Every overbooked day in `range`. Conflicts are data, not errors: an
    /// empty vector means none were found.
    pub async fn detect_conflicts(&self, property_id: &str, range: DateRange) -> Result<Vec<ConflictReport>, EngineError> {
        check_query_range(&range)?;
        let reservations = with_retry(&self.retry, "reservations_for", || {
            self.bookings.reservations_for(Some(property_id))
        })
        .await?;
        let reports = conflicts_in_range(property_id, &range, &reservations);
        if !reports.is_empty() {
            metrics::counter!(crate::observability::CONFLICTS_DETECTED_TOTAL).increment(reports.len() as u64);
            warn!(
                org = %self.organization_id,
                property = property_id,
                days = reports.len(),
                "overbooking detected"
            );
        }
        Ok(reports)
    }

    /// Plan a bulk edit against the current snapshot, reusing ids of rules
    /// that already have the identical scope and range.
    pub async fn plan_bulk_apply(
        &self,
        range: DateRange,
        payload: &RulePayload,
        target: &BulkTarget,
    ) -> Result<Vec<UpsertOp>, EngineError> {
        let snap = self.loaded_snapshot().await?;
        plan_bulk_upsert(range, payload, target, Some(&snap.index))
    }

    /// Submit planned ops. Atomic stores get one batch call; other stores get
    /// one upsert per op and may partially fail.
    ///
    /// `Ok` only when every op landed. Otherwise
    /// [`EngineError::PartialBatchFailure`] carries the per-op results.
    pub async fn apply_bulk(&self, ops: Vec<UpsertOp>) -> Result<BatchOutcome, EngineError> {
        if ops.is_empty() {
            return Err(EngineError::EmptyTarget);
        }
        if ops.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let outcome = if self.store.supports_atomic_batch() {
            let drafts: Vec<RuleDraft> = ops
                .iter()
                .map(|op| op.clone().into_draft(&self.organization_id))
                .collect();
            // All-or-nothing: a failure means nothing was written, so the
            // error goes back unchanged.
            let policy = self.write_policy(drafts.iter());
            let rules = with_retry(&policy, "bulk_upsert_rules", || self.store.bulk_upsert_rules(drafts.clone())).await?;
            if rules.len() != ops.len() {
                return Err(EngineError::Transport(format!(
                    "store returned {} rules for {} ops",
                    rules.len(),
                    ops.len()
                )));
            }
            BatchOutcome {
                outcomes: ops
                    .into_iter()
                    .zip(rules)
                    .map(|(op, rule)| OpOutcome { op, result: Ok(rule) })
                    .collect(),
            }
        } else {
            let results = join_all(ops.iter().map(|op| {
                let draft = op.clone().into_draft(&self.organization_id);
                let policy = self.write_policy(std::iter::once(&draft));
                async move { with_retry(&policy, "upsert_rule", || self.store.upsert_rule(draft.clone())).await }
            }))
            .await;
            BatchOutcome {
                outcomes: ops
                    .into_iter()
                    .zip(results)
                    .map(|(op, result)| OpOutcome {
                        op,
                        result: result.map_err(|e| e.to_string()),
                    })
                    .collect(),
            }
        };

        let ok = outcome.succeeded().count();
        let failed = outcome.outcomes.len() - ok;
        metrics::counter!(crate::observability::BULK_OPS_TOTAL, "status" => "ok").increment(ok as u64);
        metrics::counter!(crate::observability::BULK_OPS_TOTAL, "status" => "failed").increment(failed as u64);
        info!(org = %self.organization_id, ok, failed, "bulk apply finished");

        if ok > 0 {
            // The writes stand even if the rebuild fails; the next refresh picks them up.
            if let Err(e) = self.reload().await {
                warn!(org = %self.organization_id, error = %e, "index refresh after bulk apply failed");
            }
        }

        if outcome.is_complete() {
            Ok(outcome)
        } else {
            Err(EngineError::PartialBatchFailure(outcome))
        }
    }

    /// Write already-validated drafts in store batches of at most
    /// `MAX_BATCH_SIZE`, then refresh. Stops at the first failed batch.
    ///
    /// When nothing landed the batch error is returned unchanged. When some
    /// batches landed before the failure, [`EngineError::ImportFailed`]
    /// carries the written rules and the first draft that was not written.
    pub async fn import_rules(&self, drafts: Vec<RuleDraft>) -> Result<Vec<PricingRule>, EngineError> {
        if drafts.len() > MAX_RULES_PER_ORG {
            return Err(EngineError::LimitExceeded("too many rules in import"));
        }
        let mut written = Vec::with_capacity(drafts.len());
        let mut failure = None;
        for chunk in drafts.chunks(MAX_BATCH_SIZE) {
            let policy = self.write_policy(chunk.iter());
            match with_retry(&policy, "bulk_upsert_rules", || self.store.bulk_upsert_rules(chunk.to_vec())).await {
                Ok(rules) => written.extend(rules),
                Err(e) => {
                    failure = Some((written.len(), e));
                    break;
                }
            }
        }
        info!(org = %self.organization_id, rules = written.len(), "rules imported");
        if !written.is_empty()
            && let Err(e) = self.reload().await
        {
            warn!(org = %self.organization_id, error = %e, "index refresh after import failed");
        }
        match failure {
            None => Ok(written),
            Some((_, source)) if written.is_empty() => Err(source),
            Some((failed_at, source)) => Err(EngineError::ImportFailed {
                written,
                failed_at,
                source: Box::new(source),
            }),
        }
    }

    pub async fn delete_rule(&self, id: Ulid) -> Result<(), EngineError> {
        with_retry(&self.retry, "delete_rule", || self.store.delete_rule(id)).await?;
        debug!(org = %self.organization_id, rule = %id, "rule deleted");
        if let Err(e) = self.reload().await {
            warn!(org = %self.organization_id, error = %e, "index refresh after delete failed");
        }
        Ok(())
    }

    // ── Rendering and validation ─────────────────────────────

    /// One cell per (property, day) in `range`, properties in the order given.
    pub async fn calendar_grid(&self, property_ids: &[String], range: DateRange) -> Result<Vec<DayCell>, EngineError> {
        check_query_range(&range)?;
        if property_ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("too many properties in grid"));
        }
        let snap = self.loaded_snapshot().await?;
        snap.ensure_covers(&range)?;

        let mut cells = Vec::with_capacity(property_ids.len() * range.days() as usize);
        for property_id in property_ids {
            let (reservations, blocks) = self.load_bookings(property_id).await?;
            for day in interval::days_of(&range) {
                cells.push(DayCell {
                    property_id: property_id.clone(),
                    date: day,
                    rule: ResolvedRule::from_rule(resolve(&snap.index, property_id, day, false)),
                    occupant: occupant_for(property_id, day, &reservations, &blocks),
                    conflict: has_conflict(property_id, day, &reservations),
                });
            }
        }
        Ok(cells)
    }

    /// Whether a new stay `[check_in, check_out)` can be booked.
    ///
    /// Nights are checked for occupants and `closed` days. The check-in
    /// day's rule decides minimum nights and whether arrival is allowed; the
    /// check-out day's rule decides whether departure is allowed.
    pub async fn check_stay(&self, property_id: &str, check_in: Day, check_out: Day) -> Result<StayCheck, EngineError> {
        if check_out <= check_in {
            return Err(EngineError::InvalidRange {
                start: check_in,
                end: check_out,
            });
        }
        let stay = DateRange::new(check_in, check_out)?;
        check_query_range(&stay)?;
        let snap = self.loaded_snapshot().await?;
        // The check-out day itself needs a rule too.
        snap.ensure_covers(&DateRange {
            start: check_in,
            end: interval::next_day(check_out),
        })?;
        let (reservations, blocks) = self.load_bookings(property_id).await?;

        let effective = |day| ResolvedRule::from_rule(resolve(&snap.index, property_id, day, false));
        let mut check = StayCheck::default();

        for night in interval::days_of(&stay) {
            if let Some(occupant) = occupant_for(property_id, night, &reservations, &blocks) {
                check.violations.push(StayViolation::Occupied {
                    date: night,
                    occupant_id: occupant.id().to_string(),
                });
            }
            if effective(night).restriction == Some(Restriction::Closed) {
                check.violations.push(StayViolation::Closed { date: night });
            }
        }

        let arrival = effective(check_in);
        if arrival.restriction == Some(Restriction::NoCheckin) {
            check.violations.push(StayViolation::NoCheckIn { date: check_in });
        }
        let requested = stay.days() as u32;
        if requested < arrival.min_nights {
            check.violations.push(StayViolation::MinNights {
                required: arrival.min_nights,
                requested,
            });
        }
        if effective(check_out).restriction == Some(Restriction::NoCheckout) {
            check.violations.push(StayViolation::NoCheckOut { date: check_out });
        }

        Ok(check)
    }

    async fn load_bookings(&self, property_id: &str) -> Result<(Vec<Reservation>, Vec<Block>), EngineError> {
        let reservations = with_retry(&self.retry, "reservations_for", || {
            self.bookings.reservations_for(Some(property_id))
        })
        .await?;
        let blocks = with_retry(&self.retry, "blocks_for", || self.bookings.blocks_for(Some(property_id))).await?;
        Ok((reservations, blocks))
    }
}
