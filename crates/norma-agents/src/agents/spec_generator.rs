//! SpecGenerator — Markdown technical specification.
//!
//! Inputs: `regulatory_model`, `impact_analysis`. Output: `technical_spec`.
//!
//! The document skeleton — five sections in a fixed order, every impacted
//! file cited, effort totals — is assembled deterministically so the
//! structural invariants hold on every path. The LLM contributes only the
//! overview narrative; when that call fails or returns nothing usable, a
//! deterministic summary takes its place.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::llm::Gateway;
use crate::prompts;
use crate::state::{Impact, RegulatoryModel, SharedState};

use super::{Agent, AgentError};

const MAX_TOKENS: u32 = 768;

pub struct SpecGenerator {
    gateway: Arc<Gateway>,
}

impl SpecGenerator {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Σ severity weights (low=1, medium=2, high=3).
    fn effort_score(impacts: &[Impact]) -> u32 {
        impacts.iter().map(|i| i.severity.weight()).sum()
    }

    fn effort_bucket(score: u32) -> &'static str {
        match score {
            0..=4 => "small",
            5..=10 => "medium",
            _ => "large",
        }
    }

    fn fallback_overview(model: &RegulatoryModel, impacts: &[Impact]) -> String {
        format!(
            "{} — {} Foram identificados {} arquivo(s) potencialmente afetado(s).",
            model.title,
            model.description.lines().next().unwrap_or_default(),
            impacts.len()
        )
    }

    fn render(model: &RegulatoryModel, impacts: &[Impact], overview: &str) -> String {
        let mut doc = String::new();
        doc.push_str(&format!("# Especificação Técnica: {}\n\n", model.title));

        doc.push_str("## Overview\n\n");
        doc.push_str(overview.trim());
        doc.push('\n');
        if !model.deadlines.is_empty() {
            doc.push_str("\nPrazos:\n");
            for deadline in &model.deadlines {
                doc.push_str(&format!("- {}: {}\n", deadline.date, deadline.description));
            }
        }

        doc.push_str("\n## Affected Components\n\n");
        if impacts.is_empty() {
            doc.push_str("Nenhum componente afetado identificado.\n");
        } else {
            for impact in impacts {
                doc.push_str(&format!(
                    "- `{}` — {} (severidade {})\n",
                    impact.file_path, impact.impact_type, impact.severity
                ));
            }
        }

        doc.push_str("\n## Required Changes\n\n");
        if impacts.is_empty() {
            doc.push_str("Nenhuma mudança de código necessária.\n");
        } else {
            for impact in impacts {
                doc.push_str(&format!("### {}\n\n{}\n", impact.file_path, impact.description));
                for change in &impact.suggested_changes {
                    doc.push_str(&format!("- {change}\n"));
                }
                doc.push('\n');
            }
        }

        doc.push_str("## Acceptance Criteria\n\n");
        if model.requirements.is_empty() && impacts.is_empty() {
            doc.push_str("- O sistema permanece em conformidade com a regulação.\n");
        } else {
            for req in &model.requirements {
                doc.push_str(&format!("- {req}\n"));
            }
            for impact in impacts {
                doc.push_str(&format!(
                    "- Mudanças em `{}` cobertas por testes.\n",
                    impact.file_path
                ));
            }
        }

        let score = Self::effort_score(impacts);
        doc.push_str("\n## Estimated Effort\n\n");
        doc.push_str(&format!(
            "Pontuação: {score} ({})\n",
            Self::effort_bucket(score)
        ));
        doc
    }
}

#[async_trait]
impl Agent for SpecGenerator {
    fn name(&self) -> &'static str {
        "SpecGenerator"
    }

    async fn run(&self, state: &mut SharedState) -> Result<(), AgentError> {
        let Some(model) = state.regulatory_model.clone() else {
            return Err(AgentError::new("regulatory model missing"));
        };
        let impacts = state.impact_analysis.clone();

        let prompt = prompts::spec_overview(&model, &impacts);
        let overview = match self.gateway.generate(&prompt, MAX_TOKENS).await {
            Ok(text) => text,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(execution_id = %state.execution_id, error = %e, "overview generation failed, using deterministic summary");
                Self::fallback_overview(&model, &impacts)
            }
        };

        state.technical_spec = Some(Self::render(&model, &impacts, &overview));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::llm::LlmError;
    use crate::state::{ImpactType, Severity, SPEC_SECTIONS};

    fn model() -> RegulatoryModel {
        RegulatoryModel {
            title: "Validação de chaves Pix".into(),
            description: "Novas regras.".into(),
            requirements: vec!["Validar formato".into()],
            deadlines: vec![],
            affected_systems: vec![],
        }
    }

    fn impact(path: &str, severity: Severity) -> Impact {
        Impact {
            file_path: path.into(),
            impact_type: ImpactType::Validation,
            severity,
            description: "ajustar regras".into(),
            suggested_changes: vec!["nova regex".into()],
        }
    }

    async fn run_with(
        script: Vec<Result<String, LlmError>>,
        impacts: Vec<Impact>,
    ) -> SharedState {
        let generator = SpecGenerator::new(Arc::new(Gateway::new(
            Arc::new(ScriptedLlm::new(script)),
            100,
        )));
        let mut state = SharedState::new("texto", "repo");
        state.regulatory_model = Some(model());
        state.impacted_files = impacts
            .iter()
            .map(|i| crate::state::ImpactedFile {
                file_path: i.file_path.clone(),
                relevance_score: 0.5,
                snippet: String::new(),
            })
            .collect();
        state.impact_analysis = impacts;
        generator.run(&mut state).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_sections_present_in_order() {
        let state = run_with(
            vec![Ok("Resumo executivo.".into())],
            vec![impact("a.py", Severity::High)],
        )
        .await;
        let spec = state.technical_spec.unwrap();

        let mut cursor = 0;
        for heading in SPEC_SECTIONS {
            let pos = spec[cursor..]
                .find(heading)
                .unwrap_or_else(|| panic!("missing {heading}"));
            cursor += pos + heading.len();
        }
    }

    #[tokio::test]
    async fn test_cites_every_impacted_file() {
        let state = run_with(
            vec![Ok("Resumo.".into())],
            vec![
                impact("domain/validators.py", Severity::High),
                impact("api/handlers.py", Severity::Low),
            ],
        )
        .await;
        let spec = state.technical_spec.clone().unwrap();
        assert!(spec.contains("domain/validators.py"));
        assert!(spec.contains("api/handlers.py"));
        assert!(state.validate().is_empty());
    }

    #[tokio::test]
    async fn test_effort_is_weighted_sum() {
        // high=3 + medium=2 + low=1 = 6 → medium bucket
        let state = run_with(
            vec![Ok("Resumo.".into())],
            vec![
                impact("a.py", Severity::High),
                impact("b.py", Severity::Medium),
                impact("c.py", Severity::Low),
            ],
        )
        .await;
        let spec = state.technical_spec.unwrap();
        assert!(spec.contains("Pontuação: 6 (medium)"));
    }

    #[tokio::test]
    async fn test_empty_impacts_yield_minimal_spec() {
        let state = run_with(vec![Ok("Resumo.".into())], vec![]).await;
        let spec = state.technical_spec.unwrap();
        assert!(spec.contains("Nenhum componente afetado"));
        assert!(spec.contains("Pontuação: 0 (small)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_failure_still_produces_valid_spec() {
        let generator = SpecGenerator::new(Arc::new(Gateway::new(
            Arc::new(ScriptedLlm::new(vec![
                Err(LlmError::Unavailable("down".into())),
                Err(LlmError::Unavailable("down".into())),
            ])),
            100,
        )));
        let mut state = SharedState::new("texto", "repo");
        state.regulatory_model = Some(model());
        generator.run(&mut state).await.unwrap();

        let spec = state.technical_spec.as_deref().unwrap();
        assert!(spec.contains("## Overview"));
        assert!(state.validate().is_empty());
    }

    #[test]
    fn test_effort_buckets() {
        assert_eq!(SpecGenerator::effort_bucket(4), "small");
        assert_eq!(SpecGenerator::effort_bucket(5), "medium");
        assert_eq!(SpecGenerator::effort_bucket(10), "medium");
        assert_eq!(SpecGenerator::effort_bucket(11), "large");
    }
}
