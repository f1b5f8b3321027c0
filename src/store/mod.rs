mod bookings;
pub mod coerce;
mod wal_store;

pub use bookings::{BookingSnapshot, MemoryBookings};
pub use wal_store::WalRuleStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;

/// Where pricing rules live. Implementations own transport and durability;
/// their errors reach callers unchanged.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Rules whose range intersects `window`, or every rule when `None`.
    async fn list_rules(
        &self,
        organization_id: &str,
        window: Option<DateRange>,
    ) -> Result<Vec<PricingRule>, EngineError>;

    /// Create when `draft.id` is `None`, otherwise merge the present fields.
    async fn upsert_rule(&self, draft: RuleDraft) -> Result<PricingRule, EngineError>;

    async fn delete_rule(&self, id: Ulid) -> Result<(), EngineError>;

    async fn bulk_upsert_rules(&self, drafts: Vec<RuleDraft>) -> Result<Vec<PricingRule>, EngineError>;

    /// Whether `bulk_upsert_rules` is all-or-nothing.
    fn supports_atomic_batch(&self) -> bool {
        false
    }
}

/// Read-only view of reservations and blocks.
#[async_trait]
pub trait BookingSource: Send + Sync {
    async fn reservations_for(&self, property_id: Option<&str>) -> Result<Vec<Reservation>, EngineError>;

    async fn blocks_for(&self, property_id: Option<&str>) -> Result<Vec<Block>, EngineError>;
}

fn check_text(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.is_empty() {
        return Err(EngineError::InvalidRecord(format!("{field} must not be empty")));
    }
    if value.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

fn check_range(range: &DateRange) -> Result<(), EngineError> {
    DateRange::new(range.start, range.end)?;
    if range.days() > MAX_RULE_SPAN_DAYS {
        return Err(EngineError::LimitExceeded("rule span too wide"));
    }
    Ok(())
}

/// Turn a draft into a full rule: a fresh one when `existing` is `None`,
/// otherwise `existing` with the draft's present fields merged in.
pub fn materialize(
    draft: RuleDraft,
    existing: Option<&PricingRule>,
    now: DateTime<Utc>,
) -> Result<PricingRule, EngineError> {
    check_text("organizationId", &draft.organization_id)?;
    let RuleDraft {
        id,
        organization_id,
        property_id,
        range,
        payload,
    } = draft;

    if let Some(pct) = payload.condition_percent
        && !pct.is_finite()
    {
        return Err(EngineError::InvalidRecord("conditionPercent must be finite".into()));
    }
    if let Some(0) = payload.min_nights {
        return Err(EngineError::InvalidRecord("minNights must be at least 1".into()));
    }
    if let Some(Some(pid)) = &property_id {
        check_text("propertyId", pid)?;
    }
    if let Some(r) = &range {
        check_range(r)?;
    }

    match existing {
        Some(current) => {
            if current.organization_id != organization_id {
                return Err(EngineError::InvalidRecord(format!(
                    "rule {} belongs to another organization",
                    current.id
                )));
            }
            let mut rule = current.clone();
            if let Some(pid) = property_id {
                rule.property_id = pid;
            }
            if let Some(r) = range {
                rule.start_date = r.start;
                rule.end_date = r.end;
            }
            if let Some(pct) = payload.condition_percent {
                rule.condition_percent = pct;
            }
            if let Some(n) = payload.min_nights {
                rule.min_nights = n;
            }
            if let Some(restriction) = payload.restriction {
                rule.restriction = restriction;
            }
            if let Some(p) = payload.priority {
                rule.priority = p;
            }
            Ok(rule)
        }
        None => {
            let range = range.ok_or_else(|| EngineError::InvalidRecord("new rule needs a date range".into()))?;
            Ok(PricingRule {
                id: id.unwrap_or_else(Ulid::new),
                organization_id,
                property_id: property_id.flatten(),
                start_date: range.start,
                end_date: range.end,
                condition_percent: payload.condition_percent.unwrap_or(0.0),
                min_nights: payload.min_nights.unwrap_or(1),
                restriction: payload.restriction.flatten(),
                priority: payload.priority.unwrap_or(0),
                created_at: now,
            })
        }
    }
}
