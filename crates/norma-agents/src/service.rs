//! Orchestrator service — owns the process-wide resources and drives runs.
//!
//! One `AnalysisService` exists per process, constructed at startup with the
//! encoder, vector index, audit store, and the configured LLM backend, all
//! behind `Arc`. Each run gets a fresh shared state and a fresh agent
//! pipeline (cheap — the heavy resources are shared), which is what makes
//! the per-request API-key override safe: it only rebuilds that run's
//! gateway.
//!
//! The end-to-end budget is soft: overruns are logged with the run's stage
//! timings, never cancelled, so every run reaches the audit store.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use retrieval::{HashEncoder, IndexReport, RepoIndexer, VectorIndex};

use crate::agents::AgentFactory;
use crate::audit::AuditStore;
use crate::config::PipelineConfig;
use crate::executor::{GraphExecutor, StageTiming};
use crate::llm::{self, LlmClient};
use crate::state::SharedState;
use crate::visualizer;

/// Aggregated result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    #[serde(flatten)]
    pub state: SharedState,
    pub graph_visualization: String,
    pub stage_timings: Vec<StageTiming>,
}

/// Health snapshot for the monitoring endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub database: &'static str,
    pub vector_store: &'static str,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Service-level failures, mapped to HTTP statuses by the server.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid input — 400, no audit record.
    #[error("regulatory_text must not be empty")]
    EmptyInput,

    /// A persistent dependency (gateway configuration) is unusable — 503.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
}

pub struct AnalysisService {
    config: PipelineConfig,
    encoder: Arc<HashEncoder>,
    index: Arc<dyn VectorIndex>,
    audit: Arc<dyn AuditStore>,
    backend: Arc<dyn LlmClient>,
}

impl AnalysisService {
    /// Wire a service from pre-built resources (tests inject doubles here).
    pub fn new(
        config: PipelineConfig,
        encoder: Arc<HashEncoder>,
        index: Arc<dyn VectorIndex>,
        audit: Arc<dyn AuditStore>,
        backend: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            config,
            encoder,
            index,
            audit,
            backend,
        }
    }

    /// Wire a service from configuration, building the configured backend.
    pub fn from_config(
        config: PipelineConfig,
        encoder: Arc<HashEncoder>,
        index: Arc<dyn VectorIndex>,
        audit: Arc<dyn AuditStore>,
    ) -> Result<Self, ServiceError> {
        let backend =
            llm::build_backend(&config).map_err(|e| ServiceError::Unavailable(e.to_string()))?;
        Ok(Self::new(config, encoder, index, audit, backend))
    }

    /// Backend for one run, honoring the per-request key override.
    fn run_backend(&self, api_key: Option<&str>) -> Result<Arc<dyn LlmClient>, ServiceError> {
        match api_key {
            None => Ok(self.backend.clone()),
            Some(key) => llm::build_backend(&self.config.with_api_key(key))
                .map_err(|e| ServiceError::Unavailable(e.to_string())),
        }
    }

    /// Run the full pipeline over `regulatory_text`.
    ///
    /// Returns `Ok` for every run that started, including runs that halted
    /// with `state.error` set — callers branch on the state. Only input
    /// validation and unusable gateway configuration are `Err`.
    pub async fn analyze(
        &self,
        regulatory_text: &str,
        repo_path: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<AnalysisOutcome, ServiceError> {
        if regulatory_text.trim().is_empty() {
            return Err(ServiceError::EmptyInput);
        }

        let repo_path =
            repo_path.unwrap_or_else(|| self.config.repo_path.to_str().unwrap_or("repo"));
        let state = SharedState::new(regulatory_text, repo_path);
        let execution_id = state.execution_id.clone();
        info!(execution_id = %execution_id, "run starting");

        let factory = AgentFactory::new(
            self.config.clone(),
            self.run_backend(api_key)?,
            self.encoder.clone(),
            self.index.clone(),
        );
        let executor = GraphExecutor::new(factory.build_pipeline());

        let started = Instant::now();
        let (state, stage_timings) = executor.execute(state).await;
        let elapsed = started.elapsed();
        if elapsed > self.config.run_budget {
            warn!(
                execution_id = %execution_id,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.config.run_budget.as_millis() as u64,
                "run exceeded soft budget"
            );
        }

        let graph_visualization = visualizer::render(&state);

        // Best-effort: an unreachable audit store degrades the health
        // endpoint but never fails a finished run.
        if let Err(e) = self.audit.save(&state).await {
            warn!(execution_id = %execution_id, error = %e, "audit save failed");
        }

        info!(
            execution_id = %execution_id,
            ok = state.error.is_none(),
            duration_ms = elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(AnalysisOutcome {
            state,
            graph_visualization,
            stage_timings,
        })
    }

    /// Fetch an audit record.
    pub async fn audit_record(
        &self,
        execution_id: &str,
    ) -> Result<Option<SharedState>, ServiceError> {
        self.audit
            .get(execution_id)
            .await
            .map_err(|e| ServiceError::Unavailable(e.to_string()))
    }

    /// Probe the backing stores.
    pub async fn health(&self) -> HealthStatus {
        let database = match self.audit.ping().await {
            Ok(()) => "available",
            Err(_) => "unavailable",
        };
        let vector_store = match self.index.count().await {
            Ok(_) => "available",
            Err(_) => "unavailable",
        };
        let status = if database == "available" && vector_store == "available" {
            "ok"
        } else {
            "degraded"
        };
        HealthStatus {
            status,
            database,
            vector_store,
            timestamp: Utc::now(),
        }
    }

    /// Run one offline indexing cycle over the configured repository.
    pub async fn index_repository(&self) -> anyhow::Result<IndexReport> {
        let indexer = RepoIndexer::new(
            self.encoder.clone(),
            self.index.clone(),
            self.config.source_extensions.clone(),
        );
        let report = indexer.index(&self.config.repo_path).await?;
        Ok(report)
    }
}
