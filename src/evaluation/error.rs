use thiserror::Error;

use super::model::FlagType;

/// Errors that stop a single flag evaluation from completing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("environment '{environment}' not found for flag '{flag_key}'")]
    EnvironmentNotFound {
        flag_key: String,
        environment: String,
    },
}

/// Write-time integrity errors for flag definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid flag key '{key}': {reason}")]
    InvalidFlagKey { key: String, reason: String },

    #[error("invalid rule value: {0}")]
    InvalidRuleValue(String),

    #[error("rule at position {index} in environment '{environment}' needs a name")]
    MissingRuleName { environment: String, index: usize },

    #[error("duplicate variation key '{key}' in environment '{environment}'")]
    DuplicateVariation { environment: String, key: String },

    #[error("default variation '{key}' does not exist in environment '{environment}'")]
    UnknownDefaultVariation { environment: String, key: String },

    #[error("{subject} in environment '{environment}' is not a {flag_type} value")]
    TypeMismatch {
        environment: String,
        subject: String,
        flag_type: FlagType,
    },
}
