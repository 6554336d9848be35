//! Fire-and-forget recording of evaluations.
//!
//! The evaluation path hands each record to [`Recorder::record`], which
//! never waits. A background task drains the queue into a
//! [`RecordingSink`]. Records are dropped when the queue is full, and sink
//! failures are logged and swallowed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::evaluation::EvaluationContext;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("recording sink failed: {0}")]
    Sink(String),
}

/// Transport details of the request that triggered an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub client_ip: Option<String>,
    pub sdk_type: Option<String>,
    pub sdk_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub project_id: Uuid,
    pub flag_key: String,
    pub environment: String,
    pub user_id: Option<String>,
    pub context: EvaluationContext,
    pub result: Value,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub sdk_version: Option<String>,
    pub sdk_type: Option<String>,
    pub client_ip: Option<String>,
}

#[async_trait]
pub trait RecordingSink: Send + Sync {
    async fn record(&self, record: EvaluationRecord) -> Result<(), RecordError>;
}

/// Handle the evaluation path uses to submit records.
#[derive(Debug, Clone)]
pub struct Recorder {
    tx: mpsc::Sender<EvaluationRecord>,
}

impl Recorder {
    /// Start the drain task. `buffer` bounds how many records may wait.
    pub fn spawn(sink: Arc<dyn RecordingSink>, buffer: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<EvaluationRecord>(buffer.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let flag_key = record.flag_key.clone();
                if let Err(e) = sink.record(record).await {
                    tracing::warn!(flag_key = %flag_key, error = %e, "failed to record evaluation");
                }
            }
            tracing::debug!("evaluation recorder stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue a record without waiting.
    pub fn record(&self, record: EvaluationRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                tracing::debug!(flag_key = %record.flag_key, "recording queue full, dropping evaluation record");
            }
            Err(TrySendError::Closed(record)) => {
                tracing::warn!(flag_key = %record.flag_key, "recorder is shut down, dropping evaluation record");
            }
        }
    }
}

/// Writes records as structured log events. Used when no database is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRecordingSink;

#[async_trait]
impl RecordingSink for LogRecordingSink {
    async fn record(&self, record: EvaluationRecord) -> Result<(), RecordError> {
        let context = serde_json::to_string(&record.context)
            .map_err(|e| RecordError::Sink(e.to_string()))?;
        tracing::info!(
            target: "flag_evaluations",
            project_id = %record.project_id,
            flag_key = %record.flag_key,
            environment = %record.environment,
            user_id = ?record.user_id,
            result = %record.result,
            reason = %record.reason,
            context = %context,
            sdk_type = ?record.sdk_type,
            sdk_version = ?record.sdk_version,
            client_ip = ?record.client_ip,
            "flag evaluated"
        );
        Ok(())
    }
}

/// Inserts records into the `flag_evaluations` table.
#[derive(Debug, Clone)]
pub struct PgRecordingSink {
    db: PgPool,
}

impl PgRecordingSink {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordingSink for PgRecordingSink {
    async fn record(&self, record: EvaluationRecord) -> Result<(), RecordError> {
        sqlx::query(
            r#"
            INSERT INTO flag_evaluations
                (id, project_id, flag_key, environment, user_id, context, result, reason,
                 sdk_version, sdk_type, client_ip, evaluated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.project_id)
        .bind(&record.flag_key)
        .bind(&record.environment)
        .bind(&record.user_id)
        .bind(sqlx::types::Json(&record.context))
        .bind(sqlx::types::Json(&record.result))
        .bind(&record.reason)
        .bind(&record.sdk_version)
        .bind(&record.sdk_type)
        .bind(&record.client_ip)
        .bind(record.timestamp)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
