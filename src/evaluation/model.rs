use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::fmt;

use super::error::ValidationError;
use super::rule::{Rule, RuleCondition};

/// Context attribute that identifies the caller for rollouts.
pub const USER_ID_ATTRIBUTE: &str = "userId";

const MAX_FLAG_KEY_LEN: usize = 64;

// MODELS

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Boolean => "BOOLEAN",
            FlagType::String => "STRING",
            FlagType::Number => "NUMBER",
            FlagType::Json => "JSON",
        }
    }

    /// Whether `value` can be served by a flag of this type. JSON flags take
    /// any value.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FlagType::Boolean => value.is_boolean(),
            FlagType::String => value.is_string(),
            FlagType::Number => value.is_number(),
            FlagType::Json => true,
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flag definition as handed to the engine.
///
/// Environments keep their declaration order so a flag serializes the way it
/// was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub key: String,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    #[serde(default)]
    pub environments: IndexMap<String, EnvironmentSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_variation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Caller supplied attributes a flag is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationContext {
    attributes: Map<String, Value>,
}

impl Flag {
    pub fn new(key: impl Into<String>, flag_type: FlagType) -> Self {
        Self {
            key: key.into(),
            flag_type,
            environments: IndexMap::new(),
        }
    }

    pub fn with_environment(
        mut self,
        name: impl Into<String>,
        settings: EnvironmentSettings,
    ) -> Self {
        self.environments.insert(name.into(), settings);
        self
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentSettings> {
        self.environments.get(name)
    }

    /// Checks a definition before it is stored.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_flag_key(&self.key)?;
        for (name, settings) in &self.environments {
            settings.validate(name, self.flag_type)?;
        }
        Ok(())
    }
}

impl EnvironmentSettings {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_variation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variations.push(Variation {
            key: key.into(),
            value,
            description: None,
        });
        self
    }

    pub fn with_default_variation(mut self, key: impl Into<String>) -> Self {
        self.default_variation = Some(key.into());
        self
    }

    pub fn variation(&self, key: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.key == key)
    }

    /// Remove a variation. Removing the default hands the default to the
    /// first remaining variation, or clears it when none are left.
    pub fn remove_variation(&mut self, key: &str) -> Option<Variation> {
        let index = self.variations.iter().position(|v| v.key == key)?;
        let removed = self.variations.remove(index);

        if self.default_variation.as_deref() == Some(key) {
            self.default_variation = self.variations.first().map(|v| v.key.clone());
        }

        Some(removed)
    }

    fn validate(&self, environment: &str, flag_type: FlagType) -> Result<(), ValidationError> {
        for (index, rule) in self.rules.iter().enumerate() {
            rule.check(index, environment)?;
        }

        let mismatch = |subject: String| ValidationError::TypeMismatch {
            environment: environment.to_string(),
            subject,
            flag_type,
        };

        if let Some(value) = &self.value {
            if !flag_type.accepts(value) {
                return Err(mismatch("value".to_string()));
            }
        }
        for (index, rule) in self.rules.iter().enumerate() {
            if let RuleCondition::Default(payload) = &rule.condition {
                if !flag_type.accepts(payload) {
                    return Err(mismatch(format!("DEFAULT rule at position {}", index)));
                }
            }
        }
        for variation in &self.variations {
            if !flag_type.accepts(&variation.value) {
                return Err(mismatch(format!("variation '{}'", variation.key)));
            }
        }

        let mut seen = HashSet::new();
        for variation in &self.variations {
            if !seen.insert(variation.key.as_str()) {
                return Err(ValidationError::DuplicateVariation {
                    environment: environment.to_string(),
                    key: variation.key.clone(),
                });
            }
        }

        if let Some(default) = &self.default_variation {
            if !seen.contains(default.as_str()) {
                return Err(ValidationError::UnknownDefaultVariation {
                    environment: environment.to_string(),
                    key: default.clone(),
                });
            }
        }

        Ok(())
    }
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_attributes(attributes: Map<String, Value>) -> Self {
        Self { attributes }
    }

    pub fn with_user_id(self, user_id: impl Into<String>) -> Self {
        self.with_attribute(USER_ID_ATTRIBUTE, Value::String(user_id.into()))
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// The `userId` attribute as text. Numbers are rendered the way a
    /// JavaScript SDK would (`1.0` becomes `"1"`); anything else counts as
    /// absent.
    pub fn user_id(&self) -> Option<String> {
        match self.attributes.get(USER_ID_ATTRIBUTE)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(number_text(n)),
            _ => None,
        }
    }
}

// HELPER FUNCTIONS

// Largest integer an f64 holds exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

/// Validating the flag key
pub fn validate_flag_key(key: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidFlagKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("flag key cannot be empty"));
    }

    if key.chars().count() > MAX_FLAG_KEY_LEN {
        return Err(invalid("flag key is too long (max: 64 characters)"));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(invalid(
            "flag key can only contain letters, numbers, underscores, dots and hyphens",
        ));
    }

    Ok(())
}
