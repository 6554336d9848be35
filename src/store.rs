//! Flag lookup adapters.
//!
//! The engine never fetches flags itself; the service asks a [`FlagStore`]
//! for snapshots. Two stores ship with the server: a JSON snapshot file held
//! in memory, and Postgres.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::evaluation::Flag;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("flag '{key}' not found in project {project_id}")]
    FlagNotFound { project_id: Uuid, key: String },

    #[error("failed to read flag snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid flag snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("stored definition of flag '{key}' is invalid: {source}")]
    CorruptFlag {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Project and environment an SDK key is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkScope {
    pub project_id: Uuid,
    pub environment: String,
}

#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn get_flag(&self, project_id: Uuid, key: &str) -> Result<Flag, StoreError>;

    async fn list_flags(&self, project_id: Uuid) -> Result<Vec<Flag>, StoreError>;

    async fn resolve_sdk_key(&self, sdk_key: &str) -> Result<Option<SdkScope>, StoreError>;
}

// IN-MEMORY STORE

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFile {
    #[serde(default)]
    projects: Vec<ProjectSnapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectSnapshot {
    id: Uuid,
    #[serde(default)]
    sdk_keys: Vec<SdkKeyEntry>,
    #[serde(default)]
    flags: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SdkKeyEntry {
    key: String,
    environment: String,
}

#[derive(Debug, Default)]
struct Snapshot {
    flags: HashMap<Uuid, IndexMap<String, Flag>>,
    sdk_keys: HashMap<String, SdkScope>,
}

impl Snapshot {
    fn insert_flag(&mut self, project_id: Uuid, flag: Flag) {
        if let Err(e) = flag.validate() {
            tracing::warn!(%project_id, flag_key = %flag.key, error = %e, "loading flag that fails validation");
        }
        let previous = self
            .flags
            .entry(project_id)
            .or_default()
            .insert(flag.key.clone(), flag);
        if let Some(previous) = previous {
            tracing::warn!(%project_id, flag_key = %previous.key, "duplicate flag key, keeping the later definition");
        }
    }
}

impl From<SnapshotFile> for Snapshot {
    fn from(file: SnapshotFile) -> Self {
        let mut snapshot = Snapshot::default();
        for project in file.projects {
            snapshot.flags.entry(project.id).or_default();
            for entry in project.sdk_keys {
                snapshot.sdk_keys.insert(
                    entry.key,
                    SdkScope {
                        project_id: project.id,
                        environment: entry.environment,
                    },
                );
            }
            // An unreadable flag is skipped, the rest of the project loads
            for raw in project.flags {
                let key = raw.get("key").and_then(Value::as_str).unwrap_or_default().to_string();
                match serde_json::from_value::<Flag>(raw) {
                    Ok(flag) => snapshot.insert_flag(project.id, flag),
                    Err(e) => {
                        tracing::warn!(project_id = %project.id, flag_key = %key, error = %e, "skipping unreadable flag in snapshot");
                    }
                }
            }
        }
        snapshot
    }
}

/// Flags held in memory, loaded from a JSON snapshot.
///
/// The whole snapshot is swapped under a write lock on reload, so readers
/// see either the old or the new set, never a mix.
#[derive(Debug, Default)]
pub struct InMemoryFlagStore {
    snapshot: RwLock<Snapshot>,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let file: SnapshotFile = serde_json::from_str(raw)?;
        Ok(Self {
            snapshot: RwLock::new(file.into()),
        })
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self::new();
        store.reload(path).await?;
        Ok(store)
    }

    /// Replace every flag and SDK key with the contents of `path`.
    pub async fn reload(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let file: SnapshotFile = serde_json::from_str(&raw)?;
        let snapshot = Snapshot::from(file);

        let flag_count: usize = snapshot.flags.values().map(|f| f.len()).sum();
        tracing::info!(path = %path.display(), projects = snapshot.flags.len(), flags = flag_count, "loaded flag snapshot");

        *self.snapshot.write().await = snapshot;
        Ok(())
    }

    pub async fn insert_flag(&self, project_id: Uuid, flag: Flag) {
        self.snapshot.write().await.insert_flag(project_id, flag);
    }

    pub async fn insert_sdk_key(&self, sdk_key: impl Into<String>, scope: SdkScope) {
        self.snapshot.write().await.sdk_keys.insert(sdk_key.into(), scope);
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn get_flag(&self, project_id: Uuid, key: &str) -> Result<Flag, StoreError> {
        self.snapshot
            .read()
            .await
            .flags
            .get(&project_id)
            .and_then(|flags| flags.get(key))
            .cloned()
            .ok_or_else(|| StoreError::FlagNotFound {
                project_id,
                key: key.to_string(),
            })
    }

    async fn list_flags(&self, project_id: Uuid) -> Result<Vec<Flag>, StoreError> {
        Ok(self
            .snapshot
            .read()
            .await
            .flags
            .get(&project_id)
            .map(|flags| flags.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn resolve_sdk_key(&self, sdk_key: &str) -> Result<Option<SdkScope>, StoreError> {
        Ok(self.snapshot.read().await.sdk_keys.get(sdk_key).cloned())
    }
}

// POSTGRES STORE

#[derive(Debug, sqlx::FromRow)]
struct FlagRow {
    key: String,
    definition: sqlx::types::Json<Value>,
}

#[derive(Debug, sqlx::FromRow)]
struct SdkKeyRow {
    project_id: Uuid,
    environment: String,
}

impl FlagRow {
    // The key column is authoritative over any key inside the definition
    fn into_flag(self) -> Result<Flag, StoreError> {
        let mut definition = self.definition.0;
        if let Value::Object(map) = &mut definition {
            map.insert("key".to_string(), Value::String(self.key.clone()));
        }
        serde_json::from_value(definition).map_err(|source| StoreError::CorruptFlag {
            key: self.key,
            source,
        })
    }
}

/// Flags stored as JSONB definitions in Postgres.
#[derive(Debug, Clone)]
pub struct PgFlagStore {
    db: PgPool,
}

impl PgFlagStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FlagStore for PgFlagStore {
    async fn get_flag(&self, project_id: Uuid, key: &str) -> Result<Flag, StoreError> {
        let row: Option<FlagRow> = sqlx::query_as(
            r#"
            SELECT key, definition FROM feature_flags
            WHERE project_id = $1 AND key = $2
            "#,
        )
        .bind(project_id)
        .bind(key)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => row.into_flag(),
            None => Err(StoreError::FlagNotFound {
                project_id,
                key: key.to_string(),
            }),
        }
    }

    async fn list_flags(&self, project_id: Uuid) -> Result<Vec<Flag>, StoreError> {
        let rows: Vec<FlagRow> = sqlx::query_as(
            r#"
            SELECT key, definition FROM feature_flags
            WHERE project_id = $1
            ORDER BY created_at, key
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.db)
        .await?;

        // One corrupt row must not hide the rest of the project
        let flags = rows
            .into_iter()
            .filter_map(|row| match row.into_flag() {
                Ok(flag) => Some(flag),
                Err(e) => {
                    tracing::warn!(%project_id, error = %e, "skipping unreadable flag definition");
                    None
                }
            })
            .collect();

        Ok(flags)
    }

    async fn resolve_sdk_key(&self, sdk_key: &str) -> Result<Option<SdkScope>, StoreError> {
        let row: Option<SdkKeyRow> = sqlx::query_as(
            r#"
            SELECT project_id, environment FROM sdk_keys WHERE key = $1
            "#,
        )
        .bind(sdk_key)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| SdkScope {
            project_id: r.project_id,
            environment: r.environment,
        }))
    }
}
