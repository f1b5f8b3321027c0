//! Edge validation for loosely-typed rule records (imports, JSON payloads).
//!
//! Numbers may arrive as strings, restrictions in several spellings, dates
//! with a time-of-day. Everything is normalized into a strict [`RuleDraft`]
//! here; malformed records never reach the index.

use serde_json::{Map, Value};
use ulid::Ulid;

use crate::engine::interval::parse_day;
use crate::engine::EngineError;
use crate::model::*;

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidRecord(msg.into())
}

/// First present, non-null value among `keys`.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| !v.is_null())
}

/// Whether any of `keys` is present, even as `null`.
fn mentioned(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().any(|k| obj.contains_key(*k))
}

fn as_number(name: &str, value: &Value) -> Result<f64, EngineError> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
        .ok_or_else(|| invalid(format!("{name}: expected a number, got {value}")))
}

fn as_string<'a>(name: &str, value: &'a Value) -> Result<&'a str, EngineError> {
    value
        .as_str()
        .ok_or_else(|| invalid(format!("{name}: expected a string, got {value}")))
}

pub fn parse_restriction(raw: &str) -> Result<Option<Restriction>, EngineError> {
    let key: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect();
    match key.as_str() {
        "" | "none" => Ok(None),
        "nocheckin" => Ok(Some(Restriction::NoCheckin)),
        "nocheckout" => Ok(Some(Restriction::NoCheckout)),
        "closed" => Ok(Some(Restriction::Closed)),
        _ => Err(invalid(format!("unknown restriction '{raw}'"))),
    }
}

/// Coerce one loose JSON record into a validated draft for `organization_id`.
///
/// A record without an `id` must carry both dates.
pub fn rule_draft_from_json(organization_id: &str, value: &Value) -> Result<RuleDraft, EngineError> {
    let obj = value.as_object().ok_or_else(|| invalid("rule record must be an object"))?;

    let id = match field(obj, &["id"]) {
        Some(v) => {
            let s = as_string("id", v)?;
            Some(s.parse::<Ulid>().map_err(|_| invalid(format!("id: '{s}' is not a ULID")))?)
        }
        None => None,
    };

    if let Some(org) = field(obj, &["organizationId", "organization_id"]) {
        let org = as_string("organizationId", org)?;
        if org != organization_id {
            return Err(invalid(format!("organizationId '{org}' does not match '{organization_id}'")));
        }
    }

    let property_keys = ["propertyId", "property_id"];
    let property_id = if mentioned(obj, &property_keys) {
        match field(obj, &property_keys) {
            Some(Value::String(s)) if s.trim().is_empty() => Some(None),
            Some(Value::String(s)) => Some(Some(s.trim().to_string())),
            Some(Value::Number(n)) => Some(Some(n.to_string())),
            Some(other) => return Err(invalid(format!("propertyId: unexpected {other}"))),
            None => Some(None),
        }
    } else {
        None
    };

    let start = field(obj, &["startDate", "start_date", "from"])
        .map(|v| as_string("startDate", v).and_then(parse_day))
        .transpose()?;
    let end = field(obj, &["endDate", "end_date", "to"])
        .map(|v| as_string("endDate", v).and_then(parse_day))
        .transpose()?;
    let range = match (start, end) {
        (Some(s), Some(e)) => Some(DateRange::new(s, e)?),
        (None, None) => None,
        _ => return Err(invalid("startDate and endDate must be given together")),
    };
    if id.is_none() && range.is_none() {
        return Err(invalid("new rule needs startDate and endDate"));
    }

    let condition_percent = field(obj, &["conditionPercent", "condition_percent", "percent"])
        .map(|v| as_number("conditionPercent", v))
        .transpose()?;

    let min_nights = field(obj, &["minNights", "min_nights"])
        .map(|v| {
            let n = as_number("minNights", v)?;
            if n < 1.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
                return Err(invalid(format!("minNights: expected a whole number >= 1, got {v}")));
            }
            Ok(n as u32)
        })
        .transpose()?;

    let restriction_keys = ["restriction"];
    let restriction = if mentioned(obj, &restriction_keys) {
        match field(obj, &restriction_keys) {
            Some(v) => Some(parse_restriction(as_string("restriction", v)?)?),
            None => Some(None),
        }
    } else {
        None
    };

    let priority = field(obj, &["priority"])
        .map(|v| {
            let n = as_number("priority", v)?;
            if n.fract() != 0.0 || n < i32::MIN as f64 || n > i32::MAX as f64 {
                return Err(invalid(format!("priority: expected an integer, got {v}")));
            }
            Ok(n as i32)
        })
        .transpose()?;

    Ok(RuleDraft {
        id,
        organization_id: organization_id.to_string(),
        property_id,
        range,
        payload: RulePayload {
            condition_percent,
            min_nights,
            restriction,
            priority,
        },
    })
}

/// Coerce an array of records. Stops at the first bad one, naming its position.
pub fn rule_drafts_from_json(organization_id: &str, value: &Value) -> Result<Vec<RuleDraft>, EngineError> {
    let items = value.as_array().ok_or_else(|| invalid("expected an array of rule records"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            rule_draft_from_json(organization_id, item).map_err(|e| match e {
                EngineError::InvalidRecord(msg) => invalid(format!("record {i}: {msg}")),
                other => other,
            })
        })
        .collect()
}
