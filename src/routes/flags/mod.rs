pub mod routes;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::evaluation::{EvaluationContext, EvaluationResult};

// MODELS

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub key: String,
    pub value: Value,
}

impl From<EvaluationResult> for EvaluateResponse {
    fn from(result: EvaluationResult) -> Self {
        Self {
            key: result.key,
            value: result.value,
        }
    }
}

// HELPER FUNCTIONS

/// Build a context from query parameters. Every value arrives as a string.
pub fn context_from_query(params: HashMap<String, String>) -> EvaluationContext {
    let attributes: Map<String, Value> = params
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect();
    EvaluationContext::from_attributes(attributes)
}
