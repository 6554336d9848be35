use serde_json::Value;

use super::model::{EnvironmentSettings, FlagType};

/// Value served when no rule decides the evaluation.
///
/// Boolean flags fall back to the environment value, then `false`.
/// Multivariate flags use the default variation, or the first declared one
/// when no default is set; without variations they use the environment value,
/// then `null`.
pub fn resolve_default(settings: &EnvironmentSettings, flag_type: FlagType) -> Value {
    if flag_type == FlagType::Boolean {
        return settings.value.clone().unwrap_or(Value::Bool(false));
    }

    let chosen = settings
        .default_variation
        .as_deref()
        .and_then(|key| settings.variation(key))
        .or_else(|| settings.variations.first());

    match chosen {
        Some(variation) => variation.value.clone(),
        None => settings.value.clone().unwrap_or(Value::Null),
    }
}
