use std::collections::HashMap;

use crate::limits::MAX_INDEXED_RULE_DAYS;
use crate::model::*;

use super::interval::days_of;
use super::EngineError;

/// Per-day lookup over an immutable rule snapshot.
///
/// Property-scoped rules are keyed by (property, day); batch rules by day
/// alone. Each slot holds the same-scope winner: higher `priority`, then
/// newer `created_at`. Rebuilt from scratch on every refresh, never mutated.
#[derive(Debug, Default)]
pub struct RuleIndex {
    rules: Vec<PricingRule>,
    by_property: HashMap<String, HashMap<Day, usize>>,
    batch: HashMap<Day, usize>,
    rule_days: usize,
}

impl RuleIndex {
    /// Materialize every rule-day. Cost is O(total rule-days).
    pub fn build(rules: Vec<PricingRule>) -> Result<Self, EngineError> {
        Self::build_within(rules, None)
    }

    /// Like [`RuleIndex::build`] but only materializes days inside `window`.
    pub fn build_within(rules: Vec<PricingRule>, window: Option<&DateRange>) -> Result<Self, EngineError> {
        // Reject bad ranges before touching any map.
        let mut total_days: i64 = 0;
        for rule in &rules {
            let range = DateRange::new(rule.start_date, rule.end_date)?;
            let effective = match window {
                Some(w) => range.clamp_to(w),
                None => Some(range),
            };
            total_days += effective.map_or(0, |r| r.days());
        }
        if total_days > MAX_INDEXED_RULE_DAYS as i64 {
            return Err(EngineError::LimitExceeded("too many rule-days to index"));
        }

        let mut index = RuleIndex {
            rules,
            by_property: HashMap::new(),
            batch: HashMap::new(),
            rule_days: total_days as usize,
        };

        for pos in 0..index.rules.len() {
            let rule = &index.rules[pos];
            let range = match window {
                Some(w) => match rule.range().clamp_to(w) {
                    Some(r) => r,
                    None => continue,
                },
                None => rule.range(),
            };
            let slots = match &rule.property_id {
                Some(pid) => index.by_property.entry(pid.clone()).or_default(),
                None => &mut index.batch,
            };
            for day in days_of(&range) {
                slots
                    .entry(day)
                    .and_modify(|held| {
                        if index.rules[pos].outranks(&index.rules[*held]) {
                            *held = pos;
                        }
                    })
                    .or_insert(pos);
            }
        }

        Ok(index)
    }

    /// Winning property-scoped rule for (property, day).
    pub fn property_rule(&self, property_id: &str, day: Day) -> Option<&PricingRule> {
        self.by_property
            .get(property_id)
            .and_then(|days| days.get(&day))
            .map(|&pos| &self.rules[pos])
    }

    /// Winning batch rule for a day.
    pub fn batch_rule(&self, day: Day) -> Option<&PricingRule> {
        self.batch.get(&day).map(|&pos| &self.rules[pos])
    }

    /// A rule with exactly this scope and range, if one is indexed.
    pub fn find_exact(&self, property_id: Option<&str>, range: &DateRange) -> Option<&PricingRule> {
        self.rules
            .iter()
            .filter(|r| r.property_id.as_deref() == property_id && r.range() == *range)
            .reduce(|best, r| if r.outranks(best) { r } else { best })
    }

    pub fn rules(&self) -> &[PricingRule] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Materialized rule-days, the dominant memory cost.
    pub fn rule_days(&self) -> usize {
        self.rule_days
    }
}
