use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

/// A calendar date with no time-of-day. The only date type in the crate.
pub type Day = NaiveDate;

/// Half-open day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(rename = "from")]
    pub start: Day,
    #[serde(rename = "to")]
    pub end: Day,
}

impl DateRange {
    /// Fails when `end < start`. `start == end` is a valid empty range.
    pub fn new(start: Day, end: Day) -> Result<Self, crate::engine::EngineError> {
        if end < start {
            return Err(crate::engine::EngineError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Number of days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, day: Day) -> bool {
        self.start <= day && day < self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection of two ranges, `None` when they do not overlap.
    pub fn clamp_to(&self, window: &DateRange) -> Option<DateRange> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then_some(DateRange { start, end })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Restriction {
    NoCheckin,
    NoCheckout,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Confirmed,
    Pending,
    Blocked,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Simple,
    Predictive,
    Maintenance,
}

/// A booked stay. Occupies `[check_in, check_out)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub property_id: String,
    #[serde(deserialize_with = "loose_day")]
    pub check_in: Day,
    #[serde(deserialize_with = "loose_day")]
    pub check_out: Day,
    pub status: ReservationStatus,
    #[serde(default)]
    pub platform: Option<String>,
}

impl Reservation {
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn stay(&self) -> DateRange {
        DateRange {
            start: self.check_in,
            end: self.check_out,
        }
    }
}

/// A deliberate closure of a property. Same exclusive-end semantics as reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub property_id: String,
    #[serde(deserialize_with = "loose_day")]
    pub start_date: Day,
    #[serde(deserialize_with = "loose_day")]
    pub end_date: Day,
    #[serde(default)]
    pub kind: Option<BlockKind>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Block {
    pub fn span(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

/// A pricing/restriction rule. `property_id == None` is an organization-wide batch rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRule {
    pub id: Ulid,
    pub organization_id: String,
    pub property_id: Option<String>,
    pub start_date: Day,
    pub end_date: Day,
    pub condition_percent: f64,
    pub min_nights: u32,
    pub restriction: Option<Restriction>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl PricingRule {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn is_batch(&self) -> bool {
        self.property_id.is_none()
    }

    /// Same-scope winner ordering: higher priority, then newer `created_at`,
    /// then larger id so the outcome never depends on input order.
    pub fn outranks(&self, other: &PricingRule) -> bool {
        (self.priority, self.created_at, self.id) > (other.priority, other.created_at, other.id)
    }
}

/// Rule fields a caller wants to set. Absent fields are left untouched on update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePayload {
    #[serde(default)]
    pub condition_percent: Option<f64>,
    #[serde(default)]
    pub min_nights: Option<u32>,
    /// Outer `None`: leave as is. `Some(None)`: clear the restriction.
    #[serde(default, deserialize_with = "present")]
    pub restriction: Option<Option<Restriction>>,
    #[serde(default)]
    pub priority: Option<i32>,
}

impl RulePayload {
    pub fn is_empty(&self) -> bool {
        self.condition_percent.is_none()
            && self.min_nights.is_none()
            && self.restriction.is_none()
            && self.priority.is_none()
    }
}

/// Booking feeds send dates with or without a time-of-day.
fn loose_day<'de, D>(deserializer: D) -> Result<Day, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    crate::engine::interval::parse_day(&raw).map_err(serde::de::Error::custom)
}

/// Distinguishes an explicit `null` from a missing field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Partial rule handed to a rule store: creates when `id` is `None`, merges otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleDraft {
    pub id: Option<Ulid>,
    pub organization_id: String,
    /// `None`: leave as is (update) or batch rule (create).
    pub property_id: Option<Option<String>>,
    pub range: Option<DateRange>,
    pub payload: RulePayload,
}

/// One planned write produced by the bulk applier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOp {
    /// Id of an existing rule with the identical scope and range, if any.
    pub id: Option<Ulid>,
    pub property_id: Option<String>,
    pub range: DateRange,
    pub payload: RulePayload,
}

impl UpsertOp {
    pub fn into_draft(self, organization_id: &str) -> RuleDraft {
        RuleDraft {
            id: self.id,
            organization_id: organization_id.to_string(),
            property_id: Some(self.property_id),
            range: Some(self.range),
            payload: self.payload,
        }
    }
}

/// Outcome of a single op inside a bulk apply.
#[derive(Debug, Clone, PartialEq)]
pub struct OpOutcome {
    pub op: UpsertOp,
    pub result: Result<PricingRule, String>,
}

/// Per-property results of a bulk apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub outcomes: Vec<OpOutcome>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &PricingRule> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Ops safe to resubmit: only the ones that failed.
    pub fn failed_ops(&self) -> Vec<UpsertOp> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.op.clone())
            .collect()
    }
}

/// What occupies a property on a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Occupant {
    Block(Block),
    Reservation(Reservation),
}

impl Occupant {
    pub fn id(&self) -> &str {
        match self {
            Occupant::Block(b) => &b.id,
            Occupant::Reservation(r) => &r.id,
        }
    }
}

/// Two or more reservations on the same property and date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub property_id: String,
    pub date: Day,
    pub reservation_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjacency {
    pub has_prev: bool,
    pub has_next: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    Property,
    Batch,
    Default,
}

/// Effective values for one (property, date) with defaults filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRule {
    pub rule_id: Option<Ulid>,
    pub scope: RuleScope,
    pub condition_percent: f64,
    pub min_nights: u32,
    pub restriction: Option<Restriction>,
}

/// One rendered calendar cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCell {
    pub property_id: String,
    pub date: Day,
    pub rule: ResolvedRule,
    pub occupant: Option<Occupant>,
    pub conflict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StayViolation {
    Occupied { date: Day, occupant_id: String },
    Closed { date: Day },
    NoCheckIn { date: Day },
    NoCheckOut { date: Day },
    MinNights { required: u32, requested: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StayCheck {
    pub violations: Vec<StayViolation>,
}

impl StayCheck {
    pub fn is_allowed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Persisted rule-store events. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RuleUpserted { rule: PricingRule },
    RuleDeleted { id: Ulid },
    /// One bulk write. Replayed whole or not at all.
    RulesUpserted { rules: Vec<PricingRule> },
}
