//! Prompt templates for the LLM-backed agents.
//!
//! Each builder assembles a structured prompt the way the agents expect to
//! parse it back: strict-JSON contracts state their schema inline; narrative
//! prompts ask for plain text. Regulatory inputs are Brazilian, so the
//! change-detection keywords are Portuguese.

use crate::state::{Impact, RegulatoryModel};

/// Keywords indicative of a mandatory regulatory change.
pub const CHANGE_KEYWORDS: [&str; 5] = [
    "alteração",
    "nova regra",
    "obrigatório",
    "deverá",
    "prazo",
];

/// Cap on file content embedded into the impact prompt.
const FILE_CONTEXT_MAX_CHARS: usize = 4_000;

/// Sentinel: change detection + risk classification.
pub fn sentinel(regulatory_text: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Você é um analista de conformidade. Avalie se o texto regulatório \
         abaixo exige mudanças em sistemas (procure termos como ",
    );
    prompt.push_str(&CHANGE_KEYWORDS.map(|k| format!("\"{k}\"")).join(", "));
    prompt.push_str(").\n\n## Texto\n");
    prompt.push_str(regulatory_text);
    prompt.push_str(
        "\n\nResponda APENAS com JSON:\n\
         {\"change_detected\": bool, \"risk_level\": \"low\"|\"medium\"|\"high\", \"reasoning\": string}\n",
    );
    prompt
}

/// Translator: structured projection of the regulation.
pub fn translator(regulatory_text: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Estruture o texto regulatório abaixo. Extraia título, descrição, \
         requisitos objetivos, prazos (datas no formato YYYY-MM-DD) e \
         sistemas afetados.\n\n## Texto\n",
    );
    prompt.push_str(regulatory_text);
    prompt.push_str(
        "\n\nResponda APENAS com JSON:\n\
         {\"title\": string, \"description\": string, \"requirements\": [string], \
         \"deadlines\": [{\"date\": string, \"description\": string}], \
         \"affected_systems\": [string]}\n",
    );
    prompt
}

/// Impact: per-file technical consequence.
pub fn impact(model: &RegulatoryModel, file_path: &str, content: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("# Regulação\n");
    prompt.push_str(&format!("**{}**\n{}\n", model.title, model.description));
    if !model.requirements.is_empty() {
        prompt.push_str("\n## Requisitos\n");
        for req in &model.requirements {
            prompt.push_str(&format!("- {req}\n"));
        }
    }
    prompt.push_str(&format!("\n# Arquivo: `{file_path}`\n```\n"));
    prompt.push_str(&truncate(content, FILE_CONTEXT_MAX_CHARS));
    prompt.push_str(
        "\n```\n\nAvalie o impacto da regulação neste arquivo. Responda APENAS com JSON:\n\
         {\"impact_type\": \"schema_change\"|\"business_logic\"|\"validation\"|\"api_contract\", \
         \"severity\": \"low\"|\"medium\"|\"high\", \"description\": string, \
         \"suggested_changes\": [string]}\n",
    );
    prompt
}

/// SpecGenerator: overview narrative for the technical spec.
pub fn spec_overview(model: &RegulatoryModel, impacts: &[Impact]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Escreva um parágrafo técnico (sem títulos) resumindo a mudança \
         regulatória abaixo e seu efeito no sistema.\n\n",
    );
    prompt.push_str(&format!("Regulação: {}\n{}\n", model.title, model.description));
    if !impacts.is_empty() {
        prompt.push_str("\nArquivos impactados:\n");
        for impact in impacts {
            prompt.push_str(&format!(
                "- {} ({}, severidade {})\n",
                impact.file_path, impact.impact_type, impact.severity
            ));
        }
    }
    prompt
}

/// PromptBuilder: specific implementation instructions for the developer.
pub fn developer_instructions(model: &RegulatoryModel, impacts: &[Impact]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Escreva instruções de implementação objetivas (lista numerada, sem \
         cabeçalhos) para um desenvolvedor aplicar a regulação abaixo.\n\n",
    );
    prompt.push_str(&format!("Regulação: {}\n", model.title));
    for req in &model.requirements {
        prompt.push_str(&format!("- {req}\n"));
    }
    for impact in impacts {
        prompt.push_str(&format!(
            "- `{}`: {}\n",
            impact.file_path, impact.description
        ));
    }
    prompt
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
