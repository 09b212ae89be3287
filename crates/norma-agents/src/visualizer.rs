//! Run visualization — renders a pipeline run as a Mermaid diagram.
//!
//! One node per agent, annotated with that agent's key outputs from the
//! shared state; edges follow execution order. A failed run marks the
//! failing node with the error prefix.

use crate::state::SharedState;

/// Agent display order, matching the executor's fixed sequence.
const AGENTS: [&str; 6] = [
    "Sentinel",
    "Translator",
    "CodeReader",
    "Impact",
    "SpecGenerator",
    "PromptBuilder",
];

/// Render the run as a Mermaid `graph TD` string.
pub fn render(state: &SharedState) -> String {
    let mut doc = String::from("graph TD\n");

    for agent in AGENTS {
        doc.push_str(&format!(
            "    {}[\"{}\"]\n",
            node_id(agent),
            annotate(agent, state)
        ));
    }
    for pair in AGENTS.windows(2) {
        doc.push_str(&format!(
            "    {} --> {}\n",
            node_id(pair[0]),
            node_id(pair[1])
        ));
    }

    if let Some(error) = &state.error {
        if let Some(agent) = AGENTS
            .iter()
            .find(|a| error.starts_with(&format!("{a}:")))
        {
            doc.push_str(&format!(
                "    {} -.-> err[\"error: {}\"]\n",
                node_id(agent),
                sanitize(error)
            ));
        }
    }
    doc
}

fn node_id(agent: &str) -> String {
    agent.to_lowercase()
}

fn annotate(agent: &str, state: &SharedState) -> String {
    match agent {
        "Sentinel" => match (state.change_detected, state.risk_level) {
            (Some(change), Some(risk)) => format!("Sentinel[change={change}, risk={risk}]"),
            _ => "Sentinel[pending]".to_string(),
        },
        "Translator" => match &state.regulatory_model {
            Some(model) => format!(
                "Translator[reqs={}, deadlines={}]",
                model.requirements.len(),
                model.deadlines.len()
            ),
            None => "Translator[pending]".to_string(),
        },
        "CodeReader" => format!("CodeReader[n={}]", state.impacted_files.len()),
        "Impact" => format!("Impact[n={}]", state.impact_analysis.len()),
        "SpecGenerator" => match &state.technical_spec {
            Some(spec) => format!("SpecGenerator[chars={}]", spec.chars().count()),
            None => "SpecGenerator[pending]".to_string(),
        },
        "PromptBuilder" => match &state.kiro_prompt {
            Some(_) => "PromptBuilder[built]".to_string(),
            None => "PromptBuilder[pending]".to_string(),
        },
        other => other.to_string(),
    }
}

/// Mermaid labels cannot carry double quotes.
fn sanitize(text: &str) -> String {
    text.replace('"', "'")
}
