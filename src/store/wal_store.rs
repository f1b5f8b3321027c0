use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;
use crate::notify::{NotifyHub, Scope};
use crate::wal::Wal;

use super::{materialize, RuleStore};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

/// Owns the WAL. Drains every append already queued, writes them with a
/// single fsync, then answers each sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch: Pending = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Pending) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so stale bytes never leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

fn apply_event(rules: &DashMap<Ulid, PricingRule>, event: &Event) {
    match event {
        Event::RuleUpserted { rule } => {
            rules.insert(rule.id, rule.clone());
        }
        Event::RuleDeleted { id } => {
            rules.remove(id);
        }
        Event::RulesUpserted { rules: batch } => {
            for rule in batch {
                rules.insert(rule.id, rule.clone());
            }
        }
    }
}

/// Rule store for one organization, durable through a write-ahead log.
pub struct WalRuleStore {
    organization_id: String,
    rules: DashMap<Ulid, PricingRule>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<NotifyHub>,
    /// Serializes read-merge-write so concurrent upserts of one rule cannot interleave.
    write_lock: Mutex<()>,
}

impl WalRuleStore {
    /// Replay `wal_path` and start the background writer. Needs a Tokio runtime.
    pub fn open(wal_path: PathBuf, organization_id: &str, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let rules = DashMap::new();
        for event in &events {
            apply_event(&rules, event);
        }
        info!(
            organization = organization_id,
            events = events.len(),
            rules = rules.len(),
            "rule store opened"
        );

        Ok(Self {
            organization_id: organization_id.to_string(),
            rules,
            wal_tx,
            notify,
            write_lock: Mutex::new(()),
        })
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn get(&self, id: &Ulid) -> Option<PricingRule> {
        self.rules.get(id).map(|e| e.value().clone())
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Append, apply, notify. The caller holds `write_lock`.
    ///
    /// Nothing is applied or broadcast unless the whole event is durable.
    async fn persist_and_apply(&self, event: Event) -> Result<(), EngineError> {
        let notices = self.notices_for(&event);
        self.wal_append(&event).await?;
        apply_event(&self.rules, &event);
        for (scope, notice) in &notices {
            self.notify.send(scope, notice);
        }
        Ok(())
    }

    /// One notice per touched rule, routed to that rule's scope. Computed
    /// before applying so a deleted rule's scope is still known.
    fn notices_for(&self, event: &Event) -> Vec<(Scope, Event)> {
        match event {
            Event::RuleUpserted { rule } => vec![(Scope::of(rule.property_id.as_deref()), event.clone())],
            Event::RuleDeleted { id } => {
                let scope = self
                    .rules
                    .get(id)
                    .map_or(Scope::Batch, |r| Scope::of(r.property_id.as_deref()));
                vec![(scope, event.clone())]
            }
            Event::RulesUpserted { rules } => rules
                .iter()
                .map(|rule| {
                    (
                        Scope::of(rule.property_id.as_deref()),
                        Event::RuleUpserted { rule: rule.clone() },
                    )
                })
                .collect(),
        }
    }

    fn check_org(&self, draft: &RuleDraft) -> Result<(), EngineError> {
        if draft.organization_id != self.organization_id {
            return Err(EngineError::InvalidRecord(format!(
                "rule for organization '{}' sent to store of '{}'",
                draft.organization_id, self.organization_id
            )));
        }
        Ok(())
    }

    /// Validate a draft against current state without writing anything.
    fn prepare(&self, draft: RuleDraft) -> Result<PricingRule, EngineError> {
        self.check_org(&draft)?;
        match draft.id {
            Some(id) if self.rules.contains_key(&id) => {
                let existing = self.get(&id).ok_or(EngineError::NotFound(id))?;
                materialize(draft, Some(&existing), Utc::now())
            }
            Some(id) => Err(EngineError::NotFound(id)),
            None => {
                if self.rules.len() >= MAX_RULES_PER_ORG {
                    return Err(EngineError::LimitExceeded("too many rules in organization"));
                }
                materialize(draft, None, Utc::now())
            }
        }
    }

    /// Rewrite the WAL as one upsert per live rule.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut rules: Vec<PricingRule> = self.rules.iter().map(|e| e.value().clone()).collect();
        rules.sort_by_key(|r| r.id);
        let events: Vec<Event> = rules.into_iter().map(|rule| Event::RuleUpserted { rule }).collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        debug!(organization = %self.organization_id, rules = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl RuleStore for WalRuleStore {
    async fn list_rules(
        &self,
        organization_id: &str,
        window: Option<DateRange>,
    ) -> Result<Vec<PricingRule>, EngineError> {
        let mut rules: Vec<PricingRule> = self
            .rules
            .iter()
            .filter(|e| e.value().organization_id == organization_id)
            .filter(|e| window.is_none_or(|w| e.value().range().overlaps(&w)))
            .map(|e| e.value().clone())
            .collect();
        rules.sort_by(|a, b| (a.start_date, a.id).cmp(&(b.start_date, b.id)));
        Ok(rules)
    }

    async fn upsert_rule(&self, draft: RuleDraft) -> Result<PricingRule, EngineError> {
        let _guard = self.write_lock.lock().await;
        let rule = self.prepare(draft)?;
        self.persist_and_apply(Event::RuleUpserted { rule: rule.clone() }).await?;
        Ok(rule)
    }

    async fn delete_rule(&self, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        if !self.rules.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(Event::RuleDeleted { id }).await
    }

    /// All-or-nothing: every draft is validated first, then the whole batch
    /// goes to the WAL as a single record with one fsync.
    async fn bulk_upsert_rules(&self, drafts: Vec<RuleDraft>) -> Result<Vec<PricingRule>, EngineError> {
        if drafts.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let _guard = self.write_lock.lock().await;
        if self.rules.len() + drafts.iter().filter(|d| d.id.is_none()).count() > MAX_RULES_PER_ORG {
            return Err(EngineError::LimitExceeded("too many rules in organization"));
        }

        // Phase 1: validate everything.
        let prepared = drafts
            .into_iter()
            .map(|draft| self.prepare(draft))
            .collect::<Result<Vec<_>, _>>()?;

        // Phase 2: commit.
        if prepared.is_empty() {
            return Ok(prepared);
        }
        self.persist_and_apply(Event::RulesUpserted { rules: prepared.clone() }).await?;
        Ok(prepared)
    }

    fn supports_atomic_batch(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staycal_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn open(name: &str) -> WalRuleStore {
        WalRuleStore::open(test_wal_path(name), "org", Arc::new(NotifyHub::new())).unwrap()
    }

    fn new_rule(property: Option<&str>, start: &str, end: &str, min_nights: u32) -> RuleDraft {
        RuleDraft {
            id: None,
            organization_id: "org".into(),
            property_id: Some(property.map(String::from)),
            range: Some(DateRange::new(d(start), d(end)).unwrap()),
            payload: RulePayload {
                min_nights: Some(min_nights),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn create_then_list_window() {
        let store = open("create_list.wal");
        store.upsert_rule(new_rule(None, "2026-01-01", "2026-01-10", 1)).await.unwrap();
        store.upsert_rule(new_rule(Some("p"), "2026-03-01", "2026-03-05", 2)).await.unwrap();

        let all = store.list_rules("org", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let jan = DateRange::new(d("2026-01-05"), d("2026-02-01")).unwrap();
        let in_jan = store.list_rules("org", Some(jan)).await.unwrap();
        assert_eq!(in_jan.len(), 1);
        assert!(in_jan[0].is_batch());

        // Window starting on the exclusive end does not intersect
        let after = DateRange::new(d("2026-01-10"), d("2026-01-20")).unwrap();
        assert!(store.list_rules("org", Some(after)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_merges_by_id() {
        let store = open("update_merge.wal");
        let created = store.upsert_rule(new_rule(Some("p"), "2026-01-01", "2026-01-10", 2)).await.unwrap();

        let patch = RuleDraft {
            id: Some(created.id),
            organization_id: "org".into(),
            payload: RulePayload {
                condition_percent: Some(-10.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let updated = store.upsert_rule(patch).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.min_nights, 2);
        assert_eq!(updated.condition_percent, -10.0);
        assert_eq!(store.rule_count(), 1);
    }

    #[tokio::test]
    async fn update_unknown_id_not_found() {
        let store = open("update_unknown.wal");
        let mut draft = new_rule(None, "2026-01-01", "2026-01-02", 1);
        draft.id = Some(Ulid::new());
        let result = store.upsert_rule(draft).await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn foreign_organization_rejected() {
        let store = open("foreign_org.wal");
        let mut draft = new_rule(None, "2026-01-01", "2026-01-02", 1);
        draft.organization_id = "someone-else".into();
        let result = store.upsert_rule(draft).await;
        assert!(matches!(result, Err(EngineError::InvalidRecord(_))));
    }

    #[tokio::test]
    async fn delete_and_missing_delete() {
        let store = open("delete.wal");
        let created = store.upsert_rule(new_rule(None, "2026-01-01", "2026-01-02", 1)).await.unwrap();
        store.delete_rule(created.id).await.unwrap();
        assert_eq!(store.rule_count(), 0);
        let again = store.delete_rule(created.id).await;
        assert!(matches!(again, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn bulk_is_all_or_nothing() {
        let store = open("bulk_atomic.wal");
        let good = new_rule(Some("p1"), "2026-01-01", "2026-01-05", 2);
        let mut bad = new_rule(Some("p2"), "2026-01-01", "2026-01-05", 2);
        bad.payload.min_nights = Some(0);

        let result = store.bulk_upsert_rules(vec![good.clone(), bad]).await;
        assert!(result.is_err());
        assert_eq!(store.rule_count(), 0);

        let ok = store
            .bulk_upsert_rules(vec![good, new_rule(Some("p2"), "2026-01-01", "2026-01-05", 2)])
            .await
            .unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(store.rule_count(), 2);
        assert!(store.supports_atomic_batch());
    }

    #[tokio::test]
    async fn bulk_is_one_wal_record() {
        let path = test_wal_path("bulk_one_record.wal");
        let notify = Arc::new(NotifyHub::new());
        let mut p2_rx = notify.subscribe(Scope::Property("p2".into()));
        let store = WalRuleStore::open(path.clone(), "org", notify).unwrap();

        let written = store
            .bulk_upsert_rules(vec![
                new_rule(Some("p1"), "2026-01-01", "2026-01-05", 2),
                new_rule(Some("p2"), "2026-01-01", "2026-01-05", 2),
                new_rule(None, "2026-01-01", "2026-01-05", 2),
            ])
            .await
            .unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 1);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![Event::RulesUpserted { rules: written.clone() }]);

        // Subscribers still hear about each rule in its own scope.
        let expected = Event::RuleUpserted { rule: written[1].clone() };
        assert_eq!(p2_rx.recv().await.unwrap(), expected);
        assert!(p2_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn torn_bulk_record_replays_nothing() {
        let path = test_wal_path("bulk_torn.wal");
        {
            let store = WalRuleStore::open(path.clone(), "org", Arc::new(NotifyHub::new())).unwrap();
            store.upsert_rule(new_rule(Some("p0"), "2026-01-01", "2026-01-05", 1)).await.unwrap();
            store
                .bulk_upsert_rules(vec![
                    new_rule(Some("p1"), "2026-01-01", "2026-01-05", 2),
                    new_rule(Some("p2"), "2026-01-01", "2026-01-05", 2),
                ])
                .await
                .unwrap();
            assert_eq!(store.rule_count(), 3);
        }

        // Crash in the middle of the batch frame.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        let reopened = WalRuleStore::open(path, "org", Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(reopened.rule_count(), 1);
    }

    #[tokio::test]
    async fn replay_restores_state() {
        let path = test_wal_path("replay_state.wal");
        let kept_id;
        {
            let store = WalRuleStore::open(path.clone(), "org", Arc::new(NotifyHub::new())).unwrap();
            let kept = store.upsert_rule(new_rule(Some("p"), "2026-01-01", "2026-01-05", 4)).await.unwrap();
            let gone = store.upsert_rule(new_rule(None, "2026-01-01", "2026-01-05", 1)).await.unwrap();
            store.delete_rule(gone.id).await.unwrap();
            kept_id = kept.id;
        }
        let reopened = WalRuleStore::open(path, "org", Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(reopened.rule_count(), 1);
        assert_eq!(reopened.get(&kept_id).map(|r| r.min_nights), Some(4));
    }

    #[tokio::test]
    async fn compact_keeps_live_rules() {
        let path = test_wal_path("compact_store.wal");
        let store = WalRuleStore::open(path.clone(), "org", Arc::new(NotifyHub::new())).unwrap();
        let mut last = None;
        for i in 0..10 {
            let r = store
                .upsert_rule(new_rule(Some("p"), "2026-01-01", "2026-01-05", i + 1))
                .await
                .unwrap();
            if let Some(prev) = last.replace(r.id) {
                store.delete_rule(prev).await.unwrap();
            }
        }
        assert_eq!(store.wal_appends_since_compact().await, 19);
        store.compact().await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 0);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert!(matches!(&replayed[0], Event::RuleUpserted { rule } if rule.min_nights == 10));
    }

    #[tokio::test]
    async fn changes_are_broadcast() {
        let notify = Arc::new(NotifyHub::new());
        let mut p_rx = notify.subscribe(Scope::Property("p".into()));
        let mut all_rx = notify.subscribe_all();
        let store = WalRuleStore::open(test_wal_path("broadcast.wal"), "org", notify).unwrap();

        let created = store.upsert_rule(new_rule(Some("p"), "2026-01-01", "2026-01-05", 2)).await.unwrap();
        let expected = Event::RuleUpserted { rule: created };
        assert_eq!(p_rx.recv().await.unwrap(), expected);
        assert_eq!(all_rx.recv().await.unwrap(), expected);
    }
}
