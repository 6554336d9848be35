use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::evaluation::{self, EvaluationContext, EvaluationError, EvaluationResult, Flag};
use crate::recording::{EvaluationRecord, Recorder, RequestMetadata};
use crate::store::{FlagStore, SdkScope, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("flag '{0}' not found")]
    FlagNotFound(String),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("missing X-SDK-Key header")]
    MissingSdkKey,

    #[error("invalid SDK key")]
    InvalidSdkKey,

    #[error("flag store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::FlagNotFound { key, .. } => ServiceError::FlagNotFound(key),
            other => ServiceError::Store(other),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::FlagNotFound(_) | ServiceError::Evaluation(_) => StatusCode::NOT_FOUND,
            ServiceError::MissingSdkKey | ServiceError::InvalidSdkKey => StatusCode::UNAUTHORIZED,
            ServiceError::Store(e) => {
                tracing::error!(error = %e, "flag store failure");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to fetch flags".to_string(),
                )
                    .into_response();
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Looks flags up, evaluates them and queues a record of every result.
pub struct FlagService {
    store: Arc<dyn FlagStore>,
    recorder: Recorder,
}

impl FlagService {
    pub fn new(store: Arc<dyn FlagStore>, recorder: Recorder) -> Self {
        Self { store, recorder }
    }

    /// Evaluate one flag of a project.
    pub async fn evaluate(
        &self,
        project_id: Uuid,
        flag_key: &str,
        environment: &str,
        context: &EvaluationContext,
        metadata: &RequestMetadata,
    ) -> Result<EvaluationResult, ServiceError> {
        let flag = self.store.get_flag(project_id, flag_key).await?;
        let result = evaluation::evaluate(&flag, environment, context)?;

        tracing::debug!(
            %project_id,
            flag_key,
            environment,
            reason = result.reason.as_str(),
            value = %result.value,
            "evaluated flag"
        );

        self.record(
            project_id,
            &result.key,
            environment,
            context,
            metadata,
            &result.value,
            result.reason.as_str(),
        );
        Ok(result)
    }

    /// Evaluate every flag of a project. Flags that cannot be evaluated in
    /// `environment` are logged and left out.
    pub async fn evaluate_all(
        &self,
        project_id: Uuid,
        environment: &str,
        context: &EvaluationContext,
        metadata: &RequestMetadata,
    ) -> Result<BTreeMap<String, Value>, ServiceError> {
        let flags: Vec<Flag> = self.store.list_flags(project_id).await?;
        let bulk = evaluation::evaluate_all(&flags, environment, context);

        for (flag_key, error) in &bulk.failures {
            tracing::warn!(%project_id, flag_key = %flag_key, environment, error = %error, "skipping flag in bulk evaluation");
        }

        tracing::debug!(
            %project_id,
            environment,
            evaluated = bulk.values.len(),
            skipped = bulk.failures.len(),
            "evaluated all flags"
        );

        for (flag_key, value) in &bulk.values {
            self.record(project_id, flag_key, environment, context, metadata, value, "BULK");
        }

        Ok(bulk.values)
    }

    /// Map an SDK key to the project and environment it serves.
    pub async fn resolve_sdk_key(&self, sdk_key: &str) -> Result<SdkScope, ServiceError> {
        self.store
            .resolve_sdk_key(sdk_key)
            .await?
            .ok_or(ServiceError::InvalidSdkKey)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        project_id: Uuid,
        flag_key: &str,
        environment: &str,
        context: &EvaluationContext,
        metadata: &RequestMetadata,
        value: &Value,
        reason: &str,
    ) {
        self.recorder.record(EvaluationRecord {
            project_id,
            flag_key: flag_key.to_string(),
            environment: environment.to_string(),
            user_id: context.user_id(),
            context: context.clone(),
            result: value.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
            sdk_version: metadata.sdk_version.clone(),
            sdk_type: metadata.sdk_type.clone(),
            client_ip: metadata.client_ip.clone(),
        });
    }
}
