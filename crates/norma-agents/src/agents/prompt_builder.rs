//! PromptBuilder — executable developer prompt.
//!
//! Inputs: `regulatory_model`, `impact_analysis`, `technical_spec`.
//! Output: `kiro_prompt`.
//!
//! The six labeled sections are assembled deterministically; the LLM refines
//! only the SPECIFIC INSTRUCTIONS body, with a deterministic fallback built
//! from the requirements and impacts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::llm::Gateway;
use crate::prompts;
use crate::state::{Impact, RegulatoryModel, SharedState};

use super::{Agent, AgentError};

const MAX_TOKENS: u32 = 768;

pub struct PromptBuilder {
    gateway: Arc<Gateway>,
}

impl PromptBuilder {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    fn fallback_instructions(model: &RegulatoryModel, impacts: &[Impact]) -> String {
        let mut body = String::new();
        let mut step = 1usize;
        for req in &model.requirements {
            body.push_str(&format!("{step}. Implementar: {req}\n"));
            step += 1;
        }
        for impact in impacts {
            body.push_str(&format!(
                "{step}. Ajustar `{}`: {}\n",
                impact.file_path, impact.description
            ));
            step += 1;
        }
        if body.is_empty() {
            body.push_str("1. Revisar o sistema quanto à conformidade com a regulação.\n");
        }
        body
    }

    fn render(
        model: &RegulatoryModel,
        impacts: &[Impact],
        technical_spec: Option<&str>,
        instructions: &str,
    ) -> String {
        let mut doc = String::new();

        doc.push_str("## CONTEXT\n\n");
        doc.push_str(&format!("Regulação: {}\n{}\n", model.title, model.description));
        if !model.affected_systems.is_empty() {
            doc.push_str(&format!(
                "Sistemas afetados: {}\n",
                model.affected_systems.join(", ")
            ));
        }

        doc.push_str("\n## OBJECTIVE\n\n");
        doc.push_str(
            "Implementar as mudanças de código exigidas pela regulação, \
             conforme a especificação técnica.\n",
        );
        if let Some(spec) = technical_spec {
            if let Some(line) = spec.lines().find(|l| l.starts_with("Pontuação:")) {
                doc.push_str(&format!("Esforço estimado — {line}\n"));
            }
        }

        doc.push_str("\n## SPECIFIC INSTRUCTIONS\n\n");
        doc.push_str(instructions.trim());
        doc.push('\n');

        doc.push_str("\n## FILE MODIFICATIONS\n\n");
        if impacts.is_empty() {
            doc.push_str("Nenhum arquivo identificado para modificação.\n");
        } else {
            for impact in impacts {
                doc.push_str(&format!(
                    "- `{}` ({}, severidade {}):\n",
                    impact.file_path, impact.impact_type, impact.severity
                ));
                for change in &impact.suggested_changes {
                    doc.push_str(&format!("  - {change}\n"));
                }
            }
        }

        doc.push_str("\n## VALIDATION STEPS\n\n");
        doc.push_str("1. Executar a suíte de testes existente.\n");
        if let Some(first) = impacts.first() {
            doc.push_str(&format!(
                "2. Cobrir `{}` com testes das novas regras.\n",
                first.file_path
            ));
        }
        if !model.deadlines.is_empty() {
            doc.push_str(&format!(
                "3. Confirmar conformidade antes de {}.\n",
                model.deadlines[0].date
            ));
        }

        doc.push_str("\n## CONSTRAINTS\n\n");
        doc.push_str("- Não alterar contratos públicos fora dos arquivos listados.\n");
        doc.push_str("- Preservar compatibilidade com integrações existentes.\n");
        for deadline in &model.deadlines {
            doc.push_str(&format!("- Prazo regulatório: {}\n", deadline.date));
        }
        doc
    }
}

#[async_trait]
impl Agent for PromptBuilder {
    fn name(&self) -> &'static str {
        "PromptBuilder"
    }

    async fn run(&self, state: &mut SharedState) -> Result<(), AgentError> {
        let Some(model) = state.regulatory_model.clone() else {
            return Err(AgentError::new("regulatory model missing"));
        };
        let impacts = state.impact_analysis.clone();

        let prompt = prompts::developer_instructions(&model, &impacts);
        let instructions = match self.gateway.generate(&prompt, MAX_TOKENS).await {
            Ok(text) => text,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(execution_id = %state.execution_id, error = %e, "instruction generation failed, using deterministic fallback");
                Self::fallback_instructions(&model, &impacts)
            }
        };

        state.kiro_prompt = Some(Self::render(
            &model,
            &impacts,
            state.technical_spec.as_deref(),
            &instructions,
        ));
        Ok(())
    }
}
