use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::bucket::{bucket, rollout_seed};
use super::model::EvaluationContext;
use super::rule::{Rule, RuleCondition};

/// Outcome of testing one rule against a context.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub matched: bool,
    pub value: Value,
}

impl RuleMatch {
    fn hit(value: Value) -> Self {
        Self {
            matched: true,
            value,
        }
    }

    fn miss() -> Self {
        Self {
            matched: false,
            value: Value::Null,
        }
    }

    fn active_if(matched: bool) -> Self {
        if matched {
            Self::hit(Value::Bool(true))
        } else {
            Self::miss()
        }
    }
}

/// Test a single rule.
///
/// Percentage, segment and schedule rules only gate on/off behaviour and emit
/// `true` when they match. A DEFAULT rule always matches and emits its own
/// payload. Rules this build cannot interpret never match.
pub fn match_rule(
    rule: &Rule,
    context: &EvaluationContext,
    flag_key: &str,
    now: DateTime<Utc>,
) -> RuleMatch {
    match &rule.condition {
        RuleCondition::Percentage(percentage) => {
            let user_id = context.user_id().unwrap_or_default();
            let slot = bucket(&rollout_seed(&user_id, flag_key));
            RuleMatch::active_if(f64::from(slot) < *percentage)
        }
        RuleCondition::UserSegment(segment) => RuleMatch::active_if(segment_matches(segment, context)),
        RuleCondition::Scheduled(schedule) => RuleMatch::active_if(schedule.contains(now)),
        RuleCondition::Default(value) => RuleMatch::hit(value.clone()),
        RuleCondition::Unrecognized { rule_type, .. } => {
            tracing::warn!(
                flag_key,
                rule_type = %rule_type,
                rule_name = ?rule.name,
                "skipping rule of unknown type"
            );
            RuleMatch::miss()
        }
        RuleCondition::Malformed {
            rule_type, reason, ..
        } => {
            tracing::warn!(
                flag_key,
                rule_type = %rule_type,
                rule_name = ?rule.name,
                reason = %reason,
                "skipping malformed rule"
            );
            RuleMatch::miss()
        }
    }
}

// Every attribute must be present and equal (AND semantics)
fn segment_matches(segment: &Map<String, Value>, context: &EvaluationContext) -> bool {
    segment.iter().all(|(attribute, expected)| {
        context
            .get(attribute)
            .is_some_and(|actual| values_equal(actual, expected))
    })
}

/// Exact equality, except that numbers compare by numeric value so `1` and
/// `1.0` are the same.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn rule(raw: Value) -> Rule {
        serde_json::from_value(raw).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_percentage_boundary() {
        // bucket("user-75rollout") == 49, bucket("user-104rollout") == 50
        let half = rule(json!({"type": "PERCENTAGE", "name": "half", "value": 50}));

        let at_49 = EvaluationContext::new().with_user_id("user-75");
        let result = match_rule(&half, &at_49, "rollout", now());
        assert!(result.matched);
        assert_eq!(result.value, json!(true));

        let at_50 = EvaluationContext::new().with_user_id("user-104");
        let result = match_rule(&half, &at_50, "rollout", now());
        assert!(!result.matched);
        assert_eq!(result.value, Value::Null);
    }

    #[test]
    fn test_percentage_extremes() {
        let none = rule(json!({"type": "PERCENTAGE", "name": "none", "value": 0}));
        let all = rule(json!({"type": "PERCENTAGE", "name": "all", "value": 100}));
        for i in 0..200 {
            let ctx = EvaluationContext::new().with_user_id(format!("user-{}", i));
            assert!(!match_rule(&none, &ctx, "rollout", now()).matched);
            assert!(match_rule(&all, &ctx, "rollout", now()).matched);
        }
    }

    #[test]
    fn test_percentage_without_user_buckets_on_flag_key() {
        // bucket("rollout") == 1
        let ctx = EvaluationContext::new();
        let at_1 = rule(json!({"type": "PERCENTAGE", "name": "p", "value": 1}));
        let at_2 = rule(json!({"type": "PERCENTAGE", "name": "p", "value": 2}));
        assert!(!match_rule(&at_1, &ctx, "rollout", now()).matched);
        assert!(match_rule(&at_2, &ctx, "rollout", now()).matched);
    }

    #[test]
    fn test_fractional_percentage() {
        // bucket("user-75rollout") == 49
        let ctx = EvaluationContext::new().with_user_id("user-75");
        let just_over = rule(json!({"type": "PERCENTAGE", "name": "p", "value": 49.5}));
        assert!(match_rule(&just_over, &ctx, "rollout", now()).matched);
    }

    #[test]
    fn test_segment_requires_every_attribute() {
        let segment = rule(json!({"type": "USER_SEGMENT", "name": "us-pros",
            "value": {"plan": "pro", "region": "us"}}));

        let partial = EvaluationContext::new().with_attribute("plan", json!("pro"));
        assert!(!match_rule(&segment, &partial, "f", now()).matched);

        let full = partial.clone().with_attribute("region", json!("us"));
        let result = match_rule(&segment, &full, "f", now());
        assert!(result.matched);
        assert_eq!(result.value, json!(true));

        let wrong = EvaluationContext::new()
            .with_attribute("plan", json!("pro"))
            .with_attribute("region", json!("eu"));
        assert!(!match_rule(&segment, &wrong, "f", now()).matched);
    }

    #[test]
    fn test_segment_equality_is_strict() {
        let segment = rule(json!({"type": "USER_SEGMENT", "name": "s", "value": {"seats": 10, "beta": true}}));

        let exact = EvaluationContext::new()
            .with_attribute("seats", json!(10.0))
            .with_attribute("beta", json!(true));
        assert!(match_rule(&segment, &exact, "f", now()).matched);

        let stringly = EvaluationContext::new()
            .with_attribute("seats", json!("10"))
            .with_attribute("beta", json!(true));
        assert!(!match_rule(&segment, &stringly, "f", now()).matched);

        let case = rule(json!({"type": "USER_SEGMENT", "name": "s", "value": {"plan": "Pro"}}));
        let lower = EvaluationContext::new().with_attribute("plan", json!("pro"));
        assert!(!match_rule(&case, &lower, "f", now()).matched);
    }

    #[test]
    fn test_empty_segment_matches_everyone() {
        let segment = rule(json!({"type": "USER_SEGMENT", "name": "all", "value": {}}));
        assert!(match_rule(&segment, &EvaluationContext::new(), "f", now()).matched);
    }

    #[test]
    fn test_scheduled_window() {
        let january = rule(json!({"type": "SCHEDULED", "name": "jan",
            "value": {"startDate": "2024-01-01", "endDate": "2024-01-31"}}));
        let ctx = EvaluationContext::new();

        assert!(match_rule(&january, &ctx, "f", now()).matched);

        let february = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert!(!match_rule(&january, &ctx, "f", february).matched);

        let december = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        assert!(!match_rule(&january, &ctx, "f", december).matched);
    }

    #[test]
    fn test_default_emits_payload() {
        let fallback = rule(json!({"type": "DEFAULT", "value": {"theme": "dark"}}));
        let result = match_rule(&fallback, &EvaluationContext::new(), "f", now());
        assert!(result.matched);
        assert_eq!(result.value, json!({"theme": "dark"}));
    }

    #[test]
    fn test_uninterpretable_rules_never_match() {
        let ctx = EvaluationContext::new().with_user_id("user-1");
        for raw in [
            json!({"type": "GEO", "name": "eu", "value": ["DE"]}),
            json!({"type": "PERCENTAGE", "name": "p", "value": 500}),
            json!({"type": "SCHEDULED", "name": "s", "value": "soon"}),
        ] {
            let result = match_rule(&rule(raw), &ctx, "f", now());
            assert_eq!(result, RuleMatch { matched: false, value: Value::Null });
        }
    }
}
