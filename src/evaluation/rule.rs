use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::error::ValidationError;

// MODELS

/// The four rule kinds a flag environment can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Percentage,
    UserSegment,
    Scheduled,
    Default,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Percentage => "PERCENTAGE",
            RuleType::UserSegment => "USER_SEGMENT",
            RuleType::Scheduled => "SCHEDULED",
            RuleType::Default => "DEFAULT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PERCENTAGE" => Some(RuleType::Percentage),
            "USER_SEGMENT" => Some(RuleType::UserSegment),
            "SCHEDULED" => Some(RuleType::Scheduled),
            "DEFAULT" => Some(RuleType::Default),
            _ => None,
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation window of a scheduled rule, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<Self, ValidationError> {
        if let Some(end) = end {
            if end < start {
                return Err(ValidationError::InvalidRuleValue(format!(
                    "schedule ends ({}) before it starts ({})",
                    end.to_rfc3339(),
                    start.to_rfc3339()
                )));
            }
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.start && self.end.map_or(true, |end| now <= end)
    }
}

/// Type-specific payload of a rule.
///
/// Stored snapshots can carry rule types this build does not know, or values
/// that fail their shape check. Those load as `Unrecognized` or `Malformed`
/// so the rest of the flag stays usable; neither ever matches.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleCondition {
    Percentage(f64),
    UserSegment(Map<String, Value>),
    Scheduled(Schedule),
    Default(Value),
    Unrecognized {
        rule_type: String,
        value: Value,
    },
    Malformed {
        rule_type: RuleType,
        value: Value,
        reason: String,
    },
}

impl RuleCondition {
    pub fn percentage(percentage: f64) -> Result<Self, ValidationError> {
        if !(0.0..=100.0).contains(&percentage) {
            return Err(ValidationError::InvalidRuleValue(format!(
                "percentage must be between 0 and 100, got {}",
                percentage
            )));
        }
        Ok(RuleCondition::Percentage(percentage))
    }

    pub fn user_segment<I, K>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        RuleCondition::UserSegment(
            attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    pub fn scheduled(
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, ValidationError> {
        Schedule::new(start, end).map(RuleCondition::Scheduled)
    }

    /// Build a condition from its stored `(type, value)` pair.
    pub fn from_parts(rule_type: &str, value: Value) -> Self {
        let Some(kind) = RuleType::parse(rule_type) else {
            return RuleCondition::Unrecognized {
                rule_type: rule_type.to_string(),
                value,
            };
        };

        let parsed = match kind {
            RuleType::Percentage => match value.as_f64() {
                Some(p) => RuleCondition::percentage(p),
                None => Err(ValidationError::InvalidRuleValue(
                    "percentage must be a number".to_string(),
                )),
            },
            RuleType::UserSegment => match value.as_object() {
                Some(map) => Ok(RuleCondition::UserSegment(map.clone())),
                None => Err(ValidationError::InvalidRuleValue(
                    "segment must be an object of attribute values".to_string(),
                )),
            },
            RuleType::Scheduled => parse_schedule(&value).map(RuleCondition::Scheduled),
            RuleType::Default => Ok(RuleCondition::Default(value.clone())),
        };

        parsed.unwrap_or_else(|err| RuleCondition::Malformed {
            rule_type: kind,
            value,
            reason: err.to_string(),
        })
    }

    /// The declared rule type, when it is one this build understands.
    pub fn rule_type(&self) -> Option<RuleType> {
        match self {
            RuleCondition::Percentage(_) => Some(RuleType::Percentage),
            RuleCondition::UserSegment(_) => Some(RuleType::UserSegment),
            RuleCondition::Scheduled(_) => Some(RuleType::Scheduled),
            RuleCondition::Default(_) => Some(RuleType::Default),
            RuleCondition::Unrecognized { .. } => None,
            RuleCondition::Malformed { rule_type, .. } => Some(*rule_type),
        }
    }

    // Unrecognized and already malformed conditions keep what they have
    fn into_malformed(self, reason: String) -> Self {
        match self.rule_type() {
            Some(rule_type) if !matches!(self, RuleCondition::Malformed { .. }) => {
                RuleCondition::Malformed {
                    rule_type,
                    value: self.to_value(),
                    reason,
                }
            }
            _ => self,
        }
    }

    fn type_name(&self) -> String {
        match self {
            RuleCondition::Unrecognized { rule_type, .. } => rule_type.clone(),
            other => other
                .rule_type()
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            RuleCondition::Percentage(p) => serde_json::Number::from_f64(*p)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            RuleCondition::UserSegment(map) => Value::Object(map.clone()),
            RuleCondition::Scheduled(schedule) => {
                let mut map = Map::new();
                map.insert(
                    "startDate".to_string(),
                    Value::String(schedule.start.to_rfc3339()),
                );
                if let Some(end) = schedule.end {
                    map.insert("endDate".to_string(), Value::String(end.to_rfc3339()));
                }
                Value::Object(map)
            }
            RuleCondition::Default(value) => value.clone(),
            RuleCondition::Unrecognized { value, .. } | RuleCondition::Malformed { value, .. } => {
                value.clone()
            }
        }
    }
}

/// One targeting rule inside an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "StoredRule")]
pub struct Rule {
    pub name: Option<String>,
    pub priority: i32,
    pub condition: RuleCondition,
}

impl Rule {
    /// Create a validated rule. Every type except DEFAULT needs a name.
    pub fn new(
        name: Option<String>,
        priority: i32,
        condition: RuleCondition,
    ) -> Result<Self, ValidationError> {
        let rule = Self {
            name,
            priority,
            condition,
        };
        rule.check(0, "")?;
        Ok(rule)
    }

    pub fn rule_type(&self) -> Option<RuleType> {
        self.condition.rule_type()
    }

    pub(crate) fn check(&self, index: usize, environment: &str) -> Result<(), ValidationError> {
        match &self.condition {
            RuleCondition::Unrecognized { rule_type, .. } => {
                return Err(ValidationError::InvalidRuleValue(format!(
                    "unknown rule type '{}'",
                    rule_type
                )));
            }
            RuleCondition::Malformed { reason, .. } => {
                return Err(ValidationError::InvalidRuleValue(reason.clone()));
            }
            RuleCondition::Percentage(p) => {
                RuleCondition::percentage(*p)?;
            }
            _ => {}
        }

        if self.priority < 0 {
            return Err(ValidationError::InvalidRuleValue(format!(
                "priority must be non-negative, got {}",
                self.priority
            )));
        }

        let unnamed = self
            .name
            .as_deref()
            .map_or(true, |name| name.trim().is_empty());
        if unnamed && self.rule_type() != Some(RuleType::Default) {
            return Err(ValidationError::MissingRuleName {
                environment: environment.to_string(),
                index,
            });
        }

        Ok(())
    }
}

// Written form of a rule. Reading goes through `From<Value>` instead so a
// damaged entry loads as a rule that never matches.
#[derive(Serialize)]
struct StoredRule {
    #[serde(rename = "type")]
    rule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    priority: i32,
    value: Value,
}

impl From<Value> for Rule {
    fn from(raw: Value) -> Self {
        let mut fields = match raw {
            Value::Object(fields) => fields,
            other => {
                return Rule {
                    name: None,
                    priority: 0,
                    condition: RuleCondition::Unrecognized {
                        rule_type: String::new(),
                        value: other,
                    },
                }
            }
        };

        let rule_type = match fields.remove("type") {
            Some(Value::String(rule_type)) => rule_type,
            _ => String::new(),
        };
        let value = fields.remove("value").unwrap_or(Value::Null);

        let (name, bad_name) = match fields.remove("name") {
            None | Some(Value::Null) => (None, None),
            Some(Value::String(name)) => (Some(name), None),
            Some(other) => (None, Some(format!("rule name must be a string, got {}", other))),
        };

        let (priority, bad_priority) = match fields.remove("priority") {
            None => (0, None),
            Some(raw) => match raw.as_i64().and_then(|p| i32::try_from(p).ok()) {
                Some(priority) => (priority, None),
                None => (0, Some(format!("priority must be an integer, got {}", raw))),
            },
        };

        let mut condition = RuleCondition::from_parts(&rule_type, value);
        if let Some(reason) = bad_name.or(bad_priority) {
            condition = condition.into_malformed(reason);
        }

        Rule {
            name,
            priority,
            condition,
        }
    }
}

impl From<Rule> for StoredRule {
    fn from(rule: Rule) -> Self {
        StoredRule {
            rule_type: rule.condition.type_name(),
            name: rule.name,
            priority: rule.priority,
            value: rule.condition.to_value(),
        }
    }
}

// HELPER FUNCTIONS

fn parse_schedule(value: &Value) -> Result<Schedule, ValidationError> {
    let invalid = |msg: &str| ValidationError::InvalidRuleValue(msg.to_string());

    let object = value
        .as_object()
        .ok_or_else(|| invalid("schedule must be an object with a startDate"))?;

    let start = object
        .get("startDate")
        .and_then(parse_timestamp)
        .ok_or_else(|| invalid("schedule startDate is missing or not a timestamp"))?;

    let end = match object.get("endDate") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            parse_timestamp(raw).ok_or_else(|| invalid("schedule endDate is not a timestamp"))?,
        ),
    };

    Schedule::new(start, end)
}

/// Accepts RFC 3339, naive date-times (taken as UTC), plain dates (midnight
/// UTC) and epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}
