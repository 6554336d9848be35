use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::defaults::resolve_default;
use super::error::EvaluationError;
use super::model::{EvaluationContext, Flag};
use super::rule::RuleType;
use super::rules::evaluate_rules;

// Flag evaluation result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub key: String,
    pub value: Value,
    pub reason: EvaluationReason,
}

/// Why an evaluation produced its value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    /// The environment is switched off.
    Disabled,
    /// The environment has no rules.
    NoRules,
    RuleMatch {
        index: usize,
        #[serde(rename = "ruleType")]
        rule_type: Option<RuleType>,
        name: Option<String>,
    },
    /// Rules exist but none matched.
    Fallthrough,
}

impl EvaluationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationReason::Disabled => "DISABLED",
            EvaluationReason::NoRules => "NO_RULES",
            EvaluationReason::RuleMatch { .. } => "RULE_MATCH",
            EvaluationReason::Fallthrough => "FALLTHROUGH",
        }
    }
}

/// Results of evaluating many flags at once.
#[derive(Debug, Default)]
pub struct BulkEvaluation {
    pub values: BTreeMap<String, Value>,
    pub failures: Vec<(String, EvaluationError)>,
}

/// Evaluate a flag in one environment against the current time.
pub fn evaluate(
    flag: &Flag,
    environment: &str,
    context: &EvaluationContext,
) -> Result<EvaluationResult, EvaluationError> {
    evaluate_at(flag, environment, context, Utc::now())
}

/// Evaluate a flag in one environment as of `now`.
pub fn evaluate_at(
    flag: &Flag,
    environment: &str,
    context: &EvaluationContext,
    now: DateTime<Utc>,
) -> Result<EvaluationResult, EvaluationError> {
    // Step 1: The flag must be configured for the environment
    let settings = flag
        .environment(environment)
        .ok_or_else(|| EvaluationError::EnvironmentNotFound {
            flag_key: flag.key.clone(),
            environment: environment.to_string(),
        })?;

    let result = |value: Value, reason: EvaluationReason| EvaluationResult {
        key: flag.key.clone(),
        value,
        reason,
    };

    // Step 2: Disabled environments always serve the default
    if !settings.enabled {
        return Ok(result(
            resolve_default(settings, flag.flag_type),
            EvaluationReason::Disabled,
        ));
    }

    // Step 3: Nothing to match against
    if settings.rules.is_empty() {
        return Ok(result(
            resolve_default(settings, flag.flag_type),
            EvaluationReason::NoRules,
        ));
    }

    // Step 4: First matching rule by priority
    if let Some(outcome) = evaluate_rules(&settings.rules, context, &flag.key, now) {
        return Ok(result(
            outcome.value,
            EvaluationReason::RuleMatch {
                index: outcome.index,
                rule_type: outcome.rule_type,
                name: outcome.name,
            },
        ));
    }

    // Step 5: No rule matched
    Ok(result(
        resolve_default(settings, flag.flag_type),
        EvaluationReason::Fallthrough,
    ))
}

/// Evaluate every flag against the current time.
pub fn evaluate_all<'a, I>(flags: I, environment: &str, context: &EvaluationContext) -> BulkEvaluation
where
    I: IntoIterator<Item = &'a Flag>,
{
    evaluate_all_at(flags, environment, context, Utc::now())
}

/// Evaluate every flag as of `now`. A flag that fails is reported in
/// `failures` and left out of `values`; the others are unaffected.
pub fn evaluate_all_at<'a, I>(
    flags: I,
    environment: &str,
    context: &EvaluationContext,
    now: DateTime<Utc>,
) -> BulkEvaluation
where
    I: IntoIterator<Item = &'a Flag>,
{
    let mut bulk = BulkEvaluation::default();

    for flag in flags {
        match evaluate_at(flag, environment, context, now) {
            Ok(evaluation) => {
                bulk.values.insert(evaluation.key, evaluation.value);
            }
            Err(e) => bulk.failures.push((flag.key.clone(), e)),
        }
    }

    bulk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::model::{EnvironmentSettings, FlagType};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn flag(raw: Value) -> Flag {
        serde_json::from_value(raw).unwrap()
    }

    fn jan_15() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    fn pro_user() -> EvaluationContext {
        EvaluationContext::new()
            .with_user_id("user-1")
            .with_attribute("plan", json!("pro"))
    }

    #[test]
    fn test_unknown_environment() {
        let flag = Flag::new("checkout", FlagType::Boolean)
            .with_environment("staging", EnvironmentSettings::new(true));

        let err = evaluate_at(&flag, "production", &pro_user(), jan_15()).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::EnvironmentNotFound {
                flag_key: "checkout".to_string(),
                environment: "production".to_string(),
            }
        );
    }

    #[test]
    fn test_environment_lookup_is_case_sensitive() {
        let flag = Flag::new("checkout", FlagType::Boolean)
            .with_environment("production", EnvironmentSettings::new(true));
        assert!(evaluate_at(&flag, "Production", &pro_user(), jan_15()).is_err());
    }

    #[test]
    fn test_disabled_serves_default() {
        let flag = flag(json!({
            "key": "checkout",
            "type": "BOOLEAN",
            "environments": {"production": {
                "enabled": false,
                "value": true,
                "rules": [{"type": "DEFAULT", "value": false}]
            }}
        }));

        let result = evaluate_at(&flag, "production", &pro_user(), jan_15()).unwrap();
        assert_eq!(result.key, "checkout");
        assert_eq!(result.value, json!(true));
        assert_eq!(result.reason, EvaluationReason::Disabled);
    }

    #[test]
    fn test_no_rules_serves_default() {
        let flag = Flag::new("color", FlagType::String).with_environment(
            "production",
            EnvironmentSettings::new(true)
                .with_variation("A", json!("red"))
                .with_variation("B", json!("blue"))
                .with_default_variation("B"),
        );

        let result = evaluate_at(&flag, "production", &pro_user(), jan_15()).unwrap();
        assert_eq!(result.value, json!("blue"));
        assert_eq!(result.reason, EvaluationReason::NoRules);
    }

    #[test]
    fn test_priority_ordering() {
        let flag = flag(json!({
            "key": "plan-gate",
            "type": "STRING",
            "environments": {"production": {
                "enabled": true,
                "rules": [
                    {"type": "DEFAULT", "priority": 5, "value": "A"},
                    {"type": "USER_SEGMENT", "name": "pros", "priority": 10, "value": {"plan": "pro"}}
                ]
            }}
        }));

        let result = evaluate_at(&flag, "production", &pro_user(), jan_15()).unwrap();
        assert_eq!(result.value, json!(true));
        assert_eq!(
            result.reason,
            EvaluationReason::RuleMatch {
                index: 1,
                rule_type: Some(RuleType::UserSegment),
                name: Some("pros".to_string()),
            }
        );
    }

    #[test]
    fn test_scheduled_activation() {
        let flag = flag(json!({
            "key": "winter-sale",
            "type": "BOOLEAN",
            "environments": {"production": {
                "enabled": true,
                "rules": [{"type": "SCHEDULED", "name": "january",
                    "value": {"startDate": "2024-01-01", "endDate": "2024-01-31"}}]
            }}
        }));
        let ctx = EvaluationContext::new();

        let during = evaluate_at(&flag, "production", &ctx, jan_15()).unwrap();
        assert_eq!(during.value, json!(true));

        let after = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let result = evaluate_at(&flag, "production", &ctx, after).unwrap();
        assert_eq!(result.value, json!(false));
        assert_eq!(result.reason, EvaluationReason::Fallthrough);
    }

    #[test]
    fn test_fallthrough_to_first_variation() {
        let flag = flag(json!({
            "key": "limit",
            "type": "NUMBER",
            "environments": {"production": {
                "enabled": true,
                "rules": [{"type": "USER_SEGMENT", "name": "eu", "value": {"region": "eu"}}],
                "variations": [{"key": "A", "value": 1}, {"key": "B", "value": 2}]
            }}
        }));

        let result = evaluate_at(&flag, "production", &pro_user(), jan_15()).unwrap();
        assert_eq!(result.value, json!(1));
        assert_eq!(result.reason, EvaluationReason::Fallthrough);
    }

    #[test]
    fn test_malformed_rule_does_not_break_flag() {
        let flag = flag(json!({
            "key": "resilient",
            "type": "STRING",
            "environments": {"production": {
                "enabled": true,
                "rules": [
                    {"type": "PERCENTAGE", "name": "broken", "priority": 9, "value": "lots"},
                    {"type": "DEFAULT", "value": "safe"}
                ]
            }}
        }));

        let result = evaluate_at(&flag, "production", &pro_user(), jan_15()).unwrap();
        assert_eq!(result.value, json!("safe"));
    }

    #[test]
    fn test_bulk_isolates_failures() {
        let f1 = Flag::new("F1", FlagType::Boolean)
            .with_environment("production", EnvironmentSettings::new(true).with_value(json!(true)));
        let f2 = Flag::new("F2", FlagType::Boolean)
            .with_environment("staging", EnvironmentSettings::new(true));

        let bulk = evaluate_all_at([&f1, &f2], "production", &pro_user(), jan_15());
        assert_eq!(bulk.values.len(), 1);
        assert_eq!(bulk.values.get("F1"), Some(&json!(true)));
        assert!(!bulk.values.contains_key("F2"));
        assert_eq!(bulk.failures.len(), 1);
        assert_eq!(bulk.failures[0].0, "F2");
    }

    #[test]
    fn test_bulk_of_nothing() {
        let bulk = evaluate_all(Vec::<&Flag>::new(), "production", &pro_user());
        assert!(bulk.values.is_empty());
        assert!(bulk.failures.is_empty());
    }

    #[test]
    fn test_reason_serializes_with_kind_tag() {
        let reason = EvaluationReason::RuleMatch {
            index: 0,
            rule_type: Some(RuleType::Percentage),
            name: Some("half".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&reason).unwrap(),
            json!({"kind": "RULE_MATCH", "index": 0, "ruleType": "PERCENTAGE", "name": "half"})
        );
        assert_eq!(serde_json::to_value(EvaluationReason::Disabled).unwrap(), json!({"kind": "DISABLED"}));
    }

    fn arb_rule() -> impl Strategy<Value = Value> {
        prop_oneof![
            (0u32..=100).prop_map(|p| json!({"type": "PERCENTAGE", "name": "p", "value": p})),
            "[a-z]{1,4}".prop_map(|plan| json!({"type": "USER_SEGMENT", "name": "s", "value": {"plan": plan}})),
            Just(json!({"type": "SCHEDULED", "name": "s", "value": {"startDate": "2020-01-01"}})),
            any::<bool>().prop_map(|v| json!({"type": "DEFAULT", "value": v})),
        ]
        .prop_flat_map(|rule| {
            (0i32..20).prop_map(move |priority| {
                let mut rule = rule.clone();
                rule["priority"] = json!(priority);
                rule
            })
        })
    }

    proptest! {
        #[test]
        fn disabled_always_serves_default(
            rules in proptest::collection::vec(arb_rule(), 0..8),
            default in any::<bool>(),
            user in "[a-z0-9]{0,12}",
        ) {
            let flag = flag(json!({
                "key": "prop-flag",
                "type": "BOOLEAN",
                "environments": {"production": {"enabled": false, "value": default, "rules": rules}}
            }));
            let ctx = EvaluationContext::new().with_user_id(user).with_attribute("plan", json!("pro"));

            let result = evaluate_at(&flag, "production", &ctx, jan_15()).unwrap();
            prop_assert_eq!(result.value, json!(default));
            prop_assert_eq!(result.reason, EvaluationReason::Disabled);
        }

        #[test]
        fn evaluation_is_idempotent(
            rules in proptest::collection::vec(arb_rule(), 0..8),
            user in "[a-z0-9]{0,12}",
        ) {
            let flag = flag(json!({
                "key": "prop-flag",
                "type": "BOOLEAN",
                "environments": {"production": {"enabled": true, "rules": rules}}
            }));
            let ctx = EvaluationContext::new().with_user_id(user).with_attribute("plan", json!("pro"));

            let first = evaluate_at(&flag, "production", &ctx, jan_15()).unwrap();
            let second = evaluate_at(&flag, "production", &ctx, jan_15()).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
