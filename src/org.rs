use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::maintenance;
use crate::notify::NotifyHub;
use crate::retry::RetryPolicy;
use crate::store::{BookingSource, WalRuleStore};

/// A loaded organization: its engine plus the concrete store behind it.
#[derive(Clone)]
pub struct Organization {
    pub engine: Arc<Engine>,
    pub store: Arc<WalRuleStore>,
    pub notify: Arc<NotifyHub>,
}

/// Per-organization engines. Each organization gets its own WAL file,
/// compactor and index refresher, created on first use.
pub struct OrganizationManager {
    orgs: DashMap<String, Organization>,
    data_dir: PathBuf,
    bookings: Arc<dyn BookingSource>,
    compact_threshold: u64,
    retry: RetryPolicy,
}

/// Keep only characters that are safe in a file name.
fn sanitize(organization_id: &str) -> String {
    organization_id
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl OrganizationManager {
    pub fn new(data_dir: PathBuf, bookings: Arc<dyn BookingSource>, compact_threshold: u64) -> Self {
        Self {
            orgs: DashMap::new(),
            data_dir,
            bookings,
            compact_threshold,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get or lazily open an organization. Needs a Tokio runtime.
    pub fn get_or_create(&self, organization_id: &str) -> Result<Organization, EngineError> {
        if let Some(org) = self.orgs.get(organization_id) {
            return Ok(org.value().clone());
        }
        if organization_id.len() > MAX_ORG_NAME_LEN {
            return Err(EngineError::LimitExceeded("organization name too long"));
        }
        // Before taking the entry: `len` locks every shard.
        if self.orgs.len() >= MAX_ORGANIZATIONS {
            return Err(EngineError::LimitExceeded("too many organizations"));
        }
        let safe_name = sanitize(organization_id);
        if safe_name.is_empty() {
            return Err(EngineError::InvalidRecord("empty organization name".into()));
        }

        let entry = match self.orgs.entry(organization_id.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(vacant) => vacant,
        };

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let store = Arc::new(
            WalRuleStore::open(wal_path, organization_id, notify.clone())
                .map_err(|e| EngineError::WalError(e.to_string()))?,
        );
        let engine = Arc::new(
            Engine::new(organization_id, store.clone(), self.bookings.clone()).with_retry_policy(self.retry.clone()),
        );

        tokio::spawn(maintenance::run_compactor(store.clone(), self.compact_threshold));
        tokio::spawn(maintenance::run_refresher(engine.clone(), notify.subscribe_all()));

        let org = entry.insert(Organization { engine, store, notify }).value().clone();
        metrics::gauge!(crate::observability::ORGANIZATIONS_ACTIVE).set(self.orgs.len() as f64);
        info!(org = organization_id, "organization loaded");
        Ok(org)
    }

    pub fn len(&self) -> usize {
        self.orgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orgs.is_empty()
    }
}
