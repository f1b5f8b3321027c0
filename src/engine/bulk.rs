use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;

use super::index::RuleIndex;
use super::EngineError;

/// Who a bulk edit applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkTarget {
    /// One organization-wide batch rule.
    Global,
    /// One rule per listed property, taken exactly as given.
    Properties(Vec<String>),
}

impl BulkTarget {
    /// Map the (property list, global flag) pair coming from a selection.
    /// A non-empty list always wins over the flag.
    pub fn from_selection(property_ids: Option<Vec<String>>, global: bool) -> Self {
        match property_ids {
            Some(ids) if !ids.is_empty() => BulkTarget::Properties(ids),
            _ if global => BulkTarget::Global,
            _ => BulkTarget::Properties(Vec::new()),
        }
    }
}

/// Turn one bulk intent into the upserts that carry it out.
///
/// The property list has already been filtered by the caller and is not
/// re-validated here. When `existing` holds a rule with the identical scope
/// and range, the op reuses its id so a repeated edit updates in place.
pub fn plan_bulk_upsert(
    range: DateRange,
    payload: &RulePayload,
    target: &BulkTarget,
    existing: Option<&RuleIndex>,
) -> Result<Vec<UpsertOp>, EngineError> {
    let scopes: Vec<Option<&str>> = match target {
        BulkTarget::Global => vec![None],
        BulkTarget::Properties(ids) if ids.is_empty() => return Err(EngineError::EmptyTarget),
        BulkTarget::Properties(ids) => ids.iter().map(|id| Some(id.as_str())).collect(),
    };
    if scopes.len() > MAX_BATCH_SIZE {
        return Err(EngineError::LimitExceeded("batch too large"));
    }

    DateRange::new(range.start, range.end)?;
    if payload.is_empty() {
        return Err(EngineError::InvalidRecord("bulk payload sets no fields".into()));
    }
    if let Some(0) = payload.min_nights {
        return Err(EngineError::InvalidRecord("minNights must be at least 1".into()));
    }

    Ok(scopes
        .into_iter()
        .map(|scope| UpsertOp {
            id: existing
                .and_then(|index| index.find_exact(scope, &range))
                .map(|r| r.id),
            property_id: scope.map(String::from),
            range,
            payload: payload.clone(),
        })
        .collect())
}
