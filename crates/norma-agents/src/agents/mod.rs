//! The six pipeline agents.
//!
//! Each agent is a function of the shared state: it reads only fields
//! produced by earlier agents and writes exactly the fields in its output
//! contract. Handled failures produce fallback values so downstream agents
//! always see a well-formed state; fatal failures raise [`AgentError`] and
//! the executor halts.
//!
//! Order is fixed and there is no conditional routing:
//! Sentinel → Translator → CodeReader → Impact → SpecGenerator → PromptBuilder.

pub mod code_reader;
pub mod impact;
pub mod prompt_builder;
pub mod sentinel;
pub mod spec_generator;
pub mod translator;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::llm::{Gateway, LlmClient};
use crate::state::SharedState;

pub use code_reader::CodeReader;
pub use impact::ImpactAnalyzer;
pub use prompt_builder::PromptBuilder;
pub use sentinel::Sentinel;
pub use spec_generator::SpecGenerator;
pub use translator::Translator;

/// A fatal agent failure. The executor records it as
/// `"<AgentName>: <message>"` and halts the run.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AgentError(pub String);

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<crate::llm::LlmError> for AgentError {
    fn from(e: crate::llm::LlmError) -> Self {
        Self(e.to_string())
    }
}

/// One stage of the pipeline.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stage name used in logs, error messages, and the run graph.
    fn name(&self) -> &'static str;

    /// Mutate the shared state per this agent's contract.
    async fn run(&self, state: &mut SharedState) -> Result<(), AgentError>;
}

/// Builds the six agents in pipeline order from the process-wide resources.
///
/// A fresh factory is cheap; the service constructs one per run so that a
/// request-scoped API-key override only affects that run's gateway.
pub struct AgentFactory {
    config: PipelineConfig,
    backend: Arc<dyn LlmClient>,
    encoder: Arc<retrieval::HashEncoder>,
    index: Arc<dyn retrieval::VectorIndex>,
}

impl AgentFactory {
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn LlmClient>,
        encoder: Arc<retrieval::HashEncoder>,
        index: Arc<dyn retrieval::VectorIndex>,
    ) -> Self {
        Self {
            config,
            backend,
            encoder,
            index,
        }
    }

    fn gateway(&self) -> Arc<Gateway> {
        Arc::new(Gateway::new(self.backend.clone(), self.config.llm_min_tokens))
    }

    /// The full pipeline in execution order.
    pub fn build_pipeline(&self) -> Vec<Arc<dyn Agent>> {
        let gateway = self.gateway();
        vec![
            Arc::new(Sentinel::new(gateway.clone())),
            Arc::new(Translator::new(gateway.clone())),
            Arc::new(CodeReader::new(
                self.encoder.clone(),
                self.index.clone(),
                self.config.repo_path.clone(),
                self.config.effective_top_k(),
                self.config.search_threshold,
                self.config.query_keywords.clone(),
            )),
            Arc::new(ImpactAnalyzer::new(gateway.clone(), self.index.clone())),
            Arc::new(SpecGenerator::new(gateway.clone())),
            Arc::new(PromptBuilder::new(gateway)),
        ]
    }
}
