//! Environment-driven pipeline configuration.
//!
//! Every knob has a default so a bare `PipelineConfig::from_env()` yields a
//! runnable local setup (Ollama backend, in-memory stores). Cloud providers
//! require their API keys; a missing key for the selected provider is a
//! startup error, not a mid-run surprise.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Which LLM gateway variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    Ollama,
    OpenAi,
    Gemini,
}

impl LlmType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }
}

/// Local Ollama endpoint.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

/// Cloud provider credentials + model.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub api_key: Option<String>,
    pub model: String,
}

/// Top-level configuration consumed by the service, server, and CLI.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Selected gateway variant (`LLM_TYPE`).
    pub llm_type: LlmType,
    pub ollama: OllamaConfig,
    pub openai: CloudConfig,
    pub gemini: CloudConfig,
    /// Postgres connection for the vector index + audit store
    /// (`DATABASE_URL`). `None` selects the in-memory stores.
    pub database_url: Option<String>,
    /// Default repository to index and read snippets from (`REPO_PATH`).
    pub repo_path: PathBuf,
    /// Encoder identity (`EMBEDDING_MODEL`); fixes the output dimension.
    pub embedding_model: String,
    /// Floor for `max_tokens` on every LLM call (`LLM_MIN_TOKENS`).
    pub llm_min_tokens: u32,
    /// HTTP bind address (`NORMA_BIND_ADDR`).
    pub bind_addr: String,
    /// Retrieval fan-out (`NORMA_TOP_K`), capped at the impacted-files limit.
    pub top_k: usize,
    /// Minimum similarity kept by retrieval (`NORMA_SEARCH_THRESHOLD`).
    pub search_threshold: f32,
    /// Soft end-to-end run budget (`NORMA_RUN_BUDGET_SECS`); overruns are
    /// logged, never cancelled.
    pub run_budget: Duration,
    /// Source extensions the indexer accepts (`NORMA_SOURCE_EXTENSIONS`,
    /// comma-separated, no dots).
    pub source_extensions: Vec<String>,
    /// Optional retrieval-query keyword augmentation
    /// (`NORMA_QUERY_KEYWORDS`, comma-separated). Off by default.
    pub query_keywords: Vec<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm_type: env_opt("LLM_TYPE")
                .and_then(|v| LlmType::parse(&v))
                .unwrap_or(LlmType::Ollama),
            ollama: OllamaConfig {
                base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
                model: env_or("OLLAMA_MODEL", "llama3.1"),
            },
            openai: CloudConfig {
                api_key: env_opt("OPENAI_API_KEY"),
                model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            },
            gemini: CloudConfig {
                api_key: env_opt("GEMINI_API_KEY"),
                model: env_or("GEMINI_MODEL", "gemini-1.5-flash"),
            },
            database_url: env_opt("DATABASE_URL"),
            repo_path: PathBuf::from(env_or("REPO_PATH", "./repo")),
            embedding_model: env_or("EMBEDDING_MODEL", retrieval::encoder::DEFAULT_MODEL),
            llm_min_tokens: env_opt("LLM_MIN_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(crate::llm::DEFAULT_MIN_TOKENS),
            bind_addr: env_or("NORMA_BIND_ADDR", "0.0.0.0:8000"),
            top_k: env_opt("NORMA_TOP_K")
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(crate::state::MAX_IMPACTED_FILES),
            search_threshold: env_opt("NORMA_SEARCH_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            run_budget: Duration::from_secs(
                env_opt("NORMA_RUN_BUDGET_SECS")
                    .and_then(|v| v.parse().ok())
                    .filter(|v| *v > 0)
                    .unwrap_or(120),
            ),
            source_extensions: env_opt("NORMA_SOURCE_EXTENSIONS")
                .map(|v| v.split(',').map(|e| e.trim().trim_start_matches('.').to_string()).collect())
                .unwrap_or_else(|| vec!["py".to_string()]),
            query_keywords: env_opt("NORMA_QUERY_KEYWORDS")
                .map(|v| v.split(',').map(|k| k.trim().to_string()).filter(|k| !k.is_empty()).collect())
                .unwrap_or_default(),
        }
    }
}

impl PipelineConfig {
    /// Build from environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Copy of this config with the active provider's API key replaced —
    /// used for the per-request `X-LLM-API-Key` override. The override is
    /// scoped to that one request; the base config never changes.
    pub fn with_api_key(&self, api_key: &str) -> Self {
        let mut config = self.clone();
        match config.llm_type {
            LlmType::Ollama => {} // local backend takes no key
            LlmType::OpenAi => config.openai.api_key = Some(api_key.to_string()),
            LlmType::Gemini => config.gemini.api_key = Some(api_key.to_string()),
        }
        config
    }

    /// `top_k` clamped to the impacted-files cap; the pipeline never carries
    /// more results than the state schema allows.
    pub fn effective_top_k(&self) -> usize {
        self.top_k.min(crate::state::MAX_IMPACTED_FILES)
    }
}
