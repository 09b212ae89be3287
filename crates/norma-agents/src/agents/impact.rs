//! Impact — per-file technical consequence analysis.
//!
//! Inputs: `regulatory_model`, `impacted_files`. Output: `impact_analysis`,
//! one entry per file in input order.
//!
//! Each file gets its own LLM call with the regulation and the file content
//! (indexed content, falling back to the retrieval snippet). Enum values
//! outside the allowed sets are clamped, a missing `suggested_changes` is
//! coerced to `[]`, and a per-file failure yields a low-severity
//! `business_logic` fallback instead of aborting the sequence. Auth and
//! rate-limit errors stay fatal for the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use retrieval::VectorIndex;

use crate::llm::{extract_json, Gateway, LlmError};
use crate::prompts;
use crate::state::{Impact, ImpactType, RegulatoryModel, Severity, SharedState};

use super::{Agent, AgentError};

const MAX_TOKENS: u32 = 1_024;

pub struct ImpactAnalyzer {
    gateway: Arc<Gateway>,
    index: Arc<dyn VectorIndex>,
}

impl ImpactAnalyzer {
    pub fn new(gateway: Arc<Gateway>, index: Arc<dyn VectorIndex>) -> Self {
        Self { gateway, index }
    }

    fn parse_impact(value: &Value, file_path: &str) -> Impact {
        let impact_type = value["impact_type"]
            .as_str()
            .and_then(ImpactType::parse)
            .unwrap_or(ImpactType::BusinessLogic);
        let severity = value["severity"]
            .as_str()
            .and_then(Severity::parse)
            .unwrap_or(Severity::Medium);
        let description = value["description"]
            .as_str()
            .unwrap_or("impacto identificado sem descrição")
            .to_string();
        let suggested_changes = value["suggested_changes"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Impact {
            file_path: file_path.to_string(),
            impact_type,
            severity,
            description,
            suggested_changes,
        }
    }

    fn fallback_impact(file_path: &str, reason: &str) -> Impact {
        Impact {
            file_path: file_path.to_string(),
            impact_type: ImpactType::BusinessLogic,
            severity: Severity::Low,
            description: format!("análise automática indisponível: {reason}"),
            suggested_changes: Vec::new(),
        }
    }

    async fn file_content(&self, file_path: &str, snippet: &str) -> String {
        match self.index.get(file_path).await {
            Ok(Some(record)) => record.content,
            _ => snippet.to_string(),
        }
    }

    async fn analyze_file(
        &self,
        model: &RegulatoryModel,
        file_path: &str,
        content: &str,
    ) -> Result<Impact, LlmError> {
        let prompt = prompts::impact(model, file_path, content);
        let text = self.gateway.generate(&prompt, MAX_TOKENS).await?;
        Ok(match extract_json(&text) {
            Some(value) => Self::parse_impact(&value, file_path),
            None => Self::fallback_impact(file_path, "resposta sem JSON"),
        })
    }
}

#[async_trait]
impl Agent for ImpactAnalyzer {
    fn name(&self) -> &'static str {
        "Impact"
    }

    async fn run(&self, state: &mut SharedState) -> Result<(), AgentError> {
        let Some(model) = state.regulatory_model.clone() else {
            return Err(AgentError::new("regulatory model missing"));
        };

        let mut analysis = Vec::with_capacity(state.impacted_files.len());
        for file in &state.impacted_files {
            let content = self.file_content(&file.file_path, &file.snippet).await;
            match self.analyze_file(&model, &file.file_path, &content).await {
                Ok(impact) => analysis.push(impact),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(
                        execution_id = %state.execution_id,
                        file = %file.file_path,
                        error = %e,
                        "per-file impact analysis failed, using fallback"
                    );
                    analysis.push(Self::fallback_impact(&file.file_path, &e.to_string()));
                }
            }
        }

        state.impact_analysis = analysis;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::state::ImpactedFile;
    use retrieval::MemoryVectorIndex;

    fn state_with_files(paths: &[&str]) -> SharedState {
        let mut state = SharedState::new("texto", "repo");
        state.regulatory_model = Some(RegulatoryModel {
            title: "T".into(),
            description: "D".into(),
            requirements: vec![],
            deadlines: vec![],
            affected_systems: vec![],
        });
        state.impacted_files = paths
            .iter()
            .map(|p| ImpactedFile {
                file_path: (*p).into(),
                relevance_score: 0.5,
                snippet: "def f(): pass".into(),
            })
            .collect();
        state
    }

    fn analyzer(script: Vec<Result<String, LlmError>>) -> ImpactAnalyzer {
        let backend = Arc::new(ScriptedLlm::new(script));
        ImpactAnalyzer::new(
            Arc::new(Gateway::new(backend, 100)),
            Arc::new(MemoryVectorIndex::new(4)),
        )
    }

    #[tokio::test]
    async fn test_one_impact_per_file_in_order() {
        let reply = |t: &str| {
            Ok(format!(
                r#"{{"impact_type": "validation", "severity": "high", "description": "{t}", "suggested_changes": ["fix"]}}"#
            ))
        };
        let analyzer = analyzer(vec![reply("first"), reply("second")]);
        let mut state = state_with_files(&["a.py", "b.py"]);
        analyzer.run(&mut state).await.unwrap();

        assert_eq!(state.impact_analysis.len(), 2);
        assert_eq!(state.impact_analysis[0].file_path, "a.py");
        assert_eq!(state.impact_analysis[0].description, "first");
        assert_eq!(state.impact_analysis[1].file_path, "b.py");
        assert_eq!(state.impact_analysis[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_unknown_enums_clamped() {
        let analyzer = analyzer(vec![Ok(
            r#"{"impact_type": "refactor", "severity": "catastrophic", "description": "d"}"#.into(),
        )]);
        let mut state = state_with_files(&["a.py"]);
        analyzer.run(&mut state).await.unwrap();

        let impact = &state.impact_analysis[0];
        assert_eq!(impact.impact_type, ImpactType::BusinessLogic);
        assert_eq!(impact.severity, Severity::Medium);
        assert!(impact.suggested_changes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_file_failure_does_not_abort_sequence() {
        let analyzer = analyzer(vec![
            Err(LlmError::Unavailable("down".into())),
            Err(LlmError::Unavailable("down".into())),
            Ok(r#"{"impact_type": "api_contract", "severity": "medium", "description": "ok"}"#
                .into()),
        ]);
        let mut state = state_with_files(&["broken.py", "fine.py"]);
        analyzer.run(&mut state).await.unwrap();

        assert_eq!(state.impact_analysis.len(), 2);
        assert_eq!(state.impact_analysis[0].severity, Severity::Low);
        assert_eq!(
            state.impact_analysis[0].impact_type,
            ImpactType::BusinessLogic
        );
        assert_eq!(state.impact_analysis[1].description, "ok");
    }

    #[tokio::test]
    async fn test_rate_limit_aborts_run() {
        let analyzer = analyzer(vec![Err(LlmError::RateLimited("429".into()))]);
        let mut state = state_with_files(&["a.py"]);
        assert!(analyzer.run(&mut state).await.is_err());
    }

    #[tokio::test]
    async fn test_no_files_yields_no_analysis() {
        let analyzer = analyzer(vec![]);
        let mut state = state_with_files(&[]);
        analyzer.run(&mut state).await.unwrap();
        assert!(state.impact_analysis.is_empty());
    }
}
