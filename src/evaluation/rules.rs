use chrono::{DateTime, Utc};
use serde_json::Value;

use super::matcher::match_rule;
use super::model::EvaluationContext;
use super::rule::{Rule, RuleType};

/// The rule that decided an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    /// Position of the rule in the environment's rule list as stored.
    pub index: usize,
    pub rule_type: Option<RuleType>,
    pub name: Option<String>,
    pub value: Value,
}

/// Try rules from highest to lowest priority and return the first match.
///
/// Rules with equal priority are tried in the order they were declared. The
/// rule type plays no part in ordering, so a low priority DEFAULT rule acts as
/// a catch-all beneath more specific rules.
pub fn evaluate_rules(
    rules: &[Rule],
    context: &EvaluationContext,
    flag_key: &str,
    now: DateTime<Utc>,
) -> Option<RuleOutcome> {
    let mut ordered: Vec<(usize, &Rule)> = rules.iter().enumerate().collect();
    // sort_by is stable
    ordered.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority));

    ordered.into_iter().find_map(|(index, rule)| {
        let result = match_rule(rule, context, flag_key, now);
        result.matched.then(|| RuleOutcome {
            index,
            rule_type: rule.rule_type(),
            name: rule.name.clone(),
            value: result.value,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn rules(raw: Value) -> Vec<Rule> {
        serde_json::from_value(raw).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_higher_priority_wins() {
        let rules = rules(json!([
            {"type": "DEFAULT", "priority": 5, "value": "A"},
            {"type": "USER_SEGMENT", "name": "pros", "priority": 10, "value": {"plan": "pro"}}
        ]));
        let ctx = EvaluationContext::new().with_attribute("plan", json!("pro"));

        let outcome = evaluate_rules(&rules, &ctx, "f", now()).unwrap();
        assert_eq!(outcome.value, json!(true));
        assert_eq!(outcome.index, 1);
        assert_eq!(outcome.rule_type, Some(RuleType::UserSegment));
        assert_eq!(outcome.name.as_deref(), Some("pros"));
    }

    #[test]
    fn test_falls_through_to_lower_priority() {
        let rules = rules(json!([
            {"type": "DEFAULT", "priority": 5, "value": "A"},
            {"type": "USER_SEGMENT", "name": "pros", "priority": 10, "value": {"plan": "pro"}}
        ]));
        let ctx = EvaluationContext::new().with_attribute("plan", json!("free"));

        let outcome = evaluate_rules(&rules, &ctx, "f", now()).unwrap();
        assert_eq!(outcome.value, json!("A"));
        assert_eq!(outcome.index, 0);
    }

    #[test]
    fn test_equal_priorities_keep_declared_order() {
        let rules = rules(json!([
            {"type": "DEFAULT", "value": "first"},
            {"type": "DEFAULT", "value": "second"},
            {"type": "DEFAULT", "priority": 0, "value": "third"}
        ]));

        let outcome = evaluate_rules(&rules, &EvaluationContext::new(), "f", now()).unwrap();
        assert_eq!(outcome.value, json!("first"));
    }

    #[test]
    fn test_type_does_not_short_circuit() {
        // bucket("user-104rollout") == 50, so a 50% rollout misses
        let rules = rules(json!([
            {"type": "DEFAULT", "priority": 0, "value": false},
            {"type": "PERCENTAGE", "name": "half", "priority": 10, "value": 50}
        ]));

        let in_rollout = EvaluationContext::new().with_user_id("user-75");
        let outcome = evaluate_rules(&rules, &in_rollout, "rollout", now()).unwrap();
        assert_eq!(outcome.value, json!(true));

        let outside = EvaluationContext::new().with_user_id("user-104");
        let outcome = evaluate_rules(&rules, &outside, "rollout", now()).unwrap();
        assert_eq!(outcome.value, json!(false));
    }

    #[test]
    fn test_no_match() {
        let rules = rules(json!([
            {"type": "USER_SEGMENT", "name": "pros", "value": {"plan": "pro"}},
            {"type": "MYSTERY", "name": "m", "priority": 99, "value": 1}
        ]));
        assert_eq!(evaluate_rules(&rules, &EvaluationContext::new(), "f", now()), None);
        assert_eq!(evaluate_rules(&[], &EvaluationContext::new(), "f", now()), None);
    }
}
