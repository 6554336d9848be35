use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::collections::HashMap;
use uuid::Uuid;

use crate::evaluation::EvaluationContext;
use crate::routes::client_meta::ClientMeta;
use crate::service::ServiceError;
use crate::state::AppState;
use super::{context_from_query, EvaluateResponse};

/// Evaluate a single flag of a project in one environment
pub async fn evaluate(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    Path((project_id, environment, flag_key)): Path<(Uuid, String, String)>,
    Json(context): Json<EvaluationContext>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state
        .flags
        .evaluate(project_id, &flag_key, &environment, &context, &meta)
        .await?;

    Ok(Json(EvaluateResponse::from(result)))
}

/// Evaluate every flag of a project in one environment
pub async fn evaluate_all(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    Path((project_id, environment)): Path<(Uuid, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ServiceError> {
    let context = context_from_query(params);

    let values = state
        .flags
        .evaluate_all(project_id, &environment, &context, &meta)
        .await?;

    Ok(Json(values))
}
