use crate::model::*;

use super::index::RuleIndex;

/// Effective rule for (property, day).
///
/// Property rules override batch rules, unless `prefer_batch` is set and a
/// batch rule exists (used when editing the batch row). `None` means
/// defaults apply.
pub fn resolve<'a>(
    index: &'a RuleIndex,
    property_id: &str,
    day: Day,
    prefer_batch: bool,
) -> Option<&'a PricingRule> {
    let prop_rule = index.property_rule(property_id, day);
    let batch_rule = index.batch_rule(day);

    if prefer_batch && batch_rule.is_some() {
        return batch_rule;
    }
    prop_rule.or(batch_rule)
}

impl ResolvedRule {
    pub const DEFAULT_CONDITION_PERCENT: f64 = 0.0;
    pub const DEFAULT_MIN_NIGHTS: u32 = 1;

    pub fn from_rule(rule: Option<&PricingRule>) -> Self {
        match rule {
            Some(r) => ResolvedRule {
                rule_id: Some(r.id),
                scope: if r.is_batch() {
                    RuleScope::Batch
                } else {
                    RuleScope::Property
                },
                condition_percent: r.condition_percent,
                min_nights: r.min_nights,
                restriction: r.restriction,
            },
            None => ResolvedRule {
                rule_id: None,
                scope: RuleScope::Default,
                condition_percent: Self::DEFAULT_CONDITION_PERCENT,
                min_nights: Self::DEFAULT_MIN_NIGHTS,
                restriction: None,
            },
        }
    }
}
