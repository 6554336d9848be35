use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::collections::HashMap;

use crate::evaluation::EvaluationContext;
use crate::routes::client_meta::ClientMeta;
use crate::routes::flags::context_from_query;
use crate::routes::sdk_auth::SdkClient;
use crate::service::ServiceError;
use crate::state::AppState;
use super::EvaluateResponse;

/// Evaluate one flag for the project and environment bound to the SDK key
pub async fn evaluate(
    State(state): State<AppState>,
    SdkClient(scope): SdkClient,
    ClientMeta(meta): ClientMeta,
    Path(flag_key): Path<String>,
    Json(context): Json<EvaluationContext>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state
        .flags
        .evaluate(scope.project_id, &flag_key, &scope.environment, &context, &meta)
        .await?;

    Ok(Json(EvaluateResponse::from(result)))
}

/// Evaluate all flags for the project and environment bound to the SDK key
pub async fn evaluate_all(
    State(state): State<AppState>,
    SdkClient(scope): SdkClient,
    ClientMeta(meta): ClientMeta,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ServiceError> {
    let context = context_from_query(params);

    let values = state
        .flags
        .evaluate_all(scope.project_id, &scope.environment, &context, &meta)
        .await?;

    Ok(Json(values))
}
