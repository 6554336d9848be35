//! Flag evaluation engine.
//!
//! Turns an immutable flag definition plus a caller context into one value.
//! Everything here is synchronous and free of I/O; callers own fetching flags
//! and recording results.
//!
//! - `bucket` - stable percentage bucketing
//! - `matcher` - tests a single rule
//! - `rules` - priority ordered rule scan
//! - `defaults` - fallback value resolution
//! - `evaluator` - single and bulk evaluation

pub mod bucket;
pub mod defaults;
pub mod error;
pub mod evaluator;
pub mod matcher;
pub mod model;
pub mod rule;
pub mod rules;

pub use bucket::bucket;
pub use defaults::resolve_default;
pub use error::{EvaluationError, ValidationError};
pub use evaluator::{
    evaluate, evaluate_all, evaluate_all_at, evaluate_at, BulkEvaluation, EvaluationReason,
    EvaluationResult,
};
pub use matcher::{match_rule, RuleMatch};
pub use model::{EnvironmentSettings, EvaluationContext, Flag, FlagType, Variation};
pub use rule::{Rule, RuleCondition, RuleType, Schedule};
pub use rules::{evaluate_rules, RuleOutcome};
