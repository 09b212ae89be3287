//! Audit store — durable per-run snapshots.
//!
//! Every run is persisted exactly once, keyed by `execution_id`, including
//! runs that halted with `error` set. Writes are idempotent upserts so a
//! retry after a partial failure cannot produce duplicate rows; concurrent
//! writers resolve per-key last-writer-wins.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_postgres::{Client, NoTls};
use tracing::error;

use crate::state::{RiskLevel, SharedState};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_logs (
    id               BIGSERIAL PRIMARY KEY,
    execution_id     TEXT NOT NULL UNIQUE,
    raw_text         TEXT NOT NULL,
    repo_path        TEXT NOT NULL,
    change_detected  BOOLEAN,
    risk_level       TEXT,
    structured_model JSONB,
    impacted_files   JSONB NOT NULL,
    impact_analysis  JSONB NOT NULL,
    technical_spec   TEXT,
    kiro_prompt      TEXT,
    error            TEXT,
    timestamp        TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS audit_logs_timestamp_idx ON audit_logs (timestamp DESC);
CREATE INDEX IF NOT EXISTS audit_logs_risk_level_idx ON audit_logs (risk_level);
";

/// Audit persistence failures. Saves are best-effort at the service
/// boundary, so these are logged rather than failing the run.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit store unavailable: {0}")]
    Unavailable(String),

    #[error("audit row malformed: {0}")]
    Malformed(String),
}

/// Persistence contract for run snapshots.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Upsert the snapshot for `state.execution_id`.
    async fn save(&self, state: &SharedState) -> Result<(), AuditError>;

    /// Fetch a snapshot by execution id.
    async fn get(&self, execution_id: &str) -> Result<Option<SharedState>, AuditError>;

    /// Cheap connectivity probe for the health endpoint.
    async fn ping(&self) -> Result<(), AuditError>;
}

/// In-memory store for tests and database-less deployments.
#[derive(Default)]
pub struct MemoryAuditStore {
    rows: RwLock<HashMap<String, SharedState>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn save(&self, state: &SharedState) -> Result<(), AuditError> {
        self.rows
            .write()
            .await
            .insert(state.execution_id.clone(), state.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<SharedState>, AuditError> {
        Ok(self.rows.read().await.get(execution_id).cloned())
    }

    async fn ping(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Postgres-backed store over the `audit_logs` table.
pub struct PgAuditStore {
    client: Arc<Client>,
}

impl PgAuditStore {
    pub async fn connect(database_url: &str) -> Result<Self, AuditError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| AuditError::Unavailable(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "audit connection closed");
            }
        });

        let store = Self {
            client: Arc::new(client),
        };
        store
            .client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| AuditError::Unavailable(e.to_string()))?;
        Ok(store)
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, AuditError> {
        serde_json::to_value(value).map_err(|e| AuditError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn save(&self, state: &SharedState) -> Result<(), AuditError> {
        let structured_model = state
            .regulatory_model
            .as_ref()
            .map(Self::to_json)
            .transpose()?;
        let impacted_files = Self::to_json(&state.impacted_files)?;
        let impact_analysis = Self::to_json(&state.impact_analysis)?;
        let risk_level = state.risk_level.map(|r| r.to_string());

        self.client
            .execute(
                "INSERT INTO audit_logs (execution_id, raw_text, repo_path, change_detected,
                     risk_level, structured_model, impacted_files, impact_analysis,
                     technical_spec, kiro_prompt, error, timestamp)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                 ON CONFLICT (execution_id) DO UPDATE SET
                     raw_text = $2, repo_path = $3, change_detected = $4, risk_level = $5,
                     structured_model = $6, impacted_files = $7, impact_analysis = $8,
                     technical_spec = $9, kiro_prompt = $10, error = $11, timestamp = $12",
                &[
                    &state.execution_id,
                    &state.regulatory_text,
                    &state.repo_path,
                    &state.change_detected,
                    &risk_level,
                    &structured_model,
                    &impacted_files,
                    &impact_analysis,
                    &state.technical_spec,
                    &state.kiro_prompt,
                    &state.error,
                    &state.execution_timestamp,
                ],
            )
            .await
            .map_err(|e| AuditError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<SharedState>, AuditError> {
        let row = self
            .client
            .query_opt(
                "SELECT execution_id, raw_text, repo_path, change_detected, risk_level,
                        structured_model, impacted_files, impact_analysis,
                        technical_spec, kiro_prompt, error, timestamp
                 FROM audit_logs WHERE execution_id = $1",
                &[&execution_id],
            )
            .await
            .map_err(|e| AuditError::Unavailable(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let risk_level: Option<String> = row.get(4);
        let structured_model: Option<serde_json::Value> = row.get(5);
        let impacted_files: serde_json::Value = row.get(6);
        let impact_analysis: serde_json::Value = row.get(7);

        Ok(Some(SharedState {
            execution_id: row.get(0),
            regulatory_text: row.get(1),
            repo_path: row.get(2),
            change_detected: row.get(3),
            risk_level: risk_level.as_deref().and_then(RiskLevel::parse),
            regulatory_model: structured_model
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| AuditError::Malformed(e.to_string()))?,
            impacted_files: serde_json::from_value(impacted_files)
                .map_err(|e| AuditError::Malformed(e.to_string()))?,
            impact_analysis: serde_json::from_value(impact_analysis)
                .map_err(|e| AuditError::Malformed(e.to_string()))?,
            technical_spec: row.get(8),
            kiro_prompt: row.get(9),
            error: row.get(10),
            execution_timestamp: row.get(11),
        }))
    }

    async fn ping(&self) -> Result<(), AuditError> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(|e| AuditError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_get_roundtrip() {
        let store = MemoryAuditStore::new();
        let mut state = SharedState::new("texto", "repo");
        state.change_detected = Some(false);
        store.save(&state).await.unwrap();

        let restored = store.get(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(restored, state);
    }

    #[tokio::test]
    async fn test_save_is_idempotent_per_execution_id() {
        let store = MemoryAuditStore::new();
        let mut state = SharedState::new("texto", "repo");
        store.save(&state).await.unwrap();

        state.technical_spec = Some("updated".into());
        store.save(&state).await.unwrap();

        assert_eq!(store.len().await, 1);
        let restored = store.get(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(restored.technical_spec.as_deref(), Some("updated"));
    }

    #[tokio::test]
    async fn test_failed_runs_are_stored_too() {
        let store = MemoryAuditStore::new();
        let mut state = SharedState::new("texto", "repo");
        state.record_error("Sentinel", "halted");
        store.save(&state).await.unwrap();

        let restored = store.get(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(restored.error.as_deref(), Some("Sentinel: halted"));
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_none() {
        let store = MemoryAuditStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }
}
