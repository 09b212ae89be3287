//! Translator — regulatory text into a structured model.
//!
//! Input: `regulatory_text`. Output: `regulatory_model`.
//!
//! One LLM call produces the model schema; structural validation rejects
//! responses without a usable title. On any handled failure (parse miss,
//! empty response, transient backend failure after retry) the agent emits a
//! minimal valid model — title from the first non-empty line, description
//! from the full text, empty lists — so downstream agents always see a
//! model. Deadline dates are normalized to ISO `YYYY-MM-DD`, and when the
//! model missed them entirely they are recovered from the text with a
//! `dd/mm/yyyy` scan.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use tracing::warn;

use crate::llm::{extract_json, Gateway};
use crate::prompts;
use crate::state::{Deadline, RegulatoryModel, SharedState};

use super::{Agent, AgentError};

const MAX_TOKENS: u32 = 1_024;

pub struct Translator {
    gateway: Arc<Gateway>,
    date_pattern: Regex,
}

impl Translator {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            date_pattern: Regex::new(r"\b(\d{2})/(\d{2})/(\d{4})\b")
                .expect("date pattern is valid"),
        }
    }

    /// Minimal valid model used on every handled-failure path.
    fn minimal_model(text: &str) -> RegulatoryModel {
        let title = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("Regulação sem título")
            .to_string();
        RegulatoryModel {
            title,
            description: text.to_string(),
            requirements: Vec::new(),
            deadlines: Vec::new(),
            affected_systems: Vec::new(),
        }
    }

    /// Normalize one model-supplied date to ISO, accepting `dd/mm/yyyy` and
    /// passing already-ISO values through.
    fn normalize_date(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok() {
            return trimmed.to_string();
        }
        if let Some(caps) = self.date_pattern.captures(trimmed) {
            let (d, m, y) = (&caps[1], &caps[2], &caps[3]);
            if let Some(date) = NaiveDate::from_ymd_opt(
                y.parse().unwrap_or(0),
                m.parse().unwrap_or(0),
                d.parse().unwrap_or(0),
            ) {
                return date.format("%Y-%m-%d").to_string();
            }
        }
        trimmed.to_string()
    }

    /// Recover deadlines straight from the text when the model missed them.
    fn extract_deadlines(&self, text: &str) -> Vec<Deadline> {
        self.date_pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let date = NaiveDate::from_ymd_opt(
                    caps[3].parse().ok()?,
                    caps[2].parse().ok()?,
                    caps[1].parse().ok()?,
                )?;
                Some(Deadline {
                    date: date.format("%Y-%m-%d").to_string(),
                    description: "prazo identificado no texto".to_string(),
                })
            })
            .collect()
    }

    fn parse_model(&self, text: &str, source_text: &str) -> Option<RegulatoryModel> {
        let value = extract_json(text)?;
        let mut model: RegulatoryModel = serde_json::from_value(value).ok()?;
        if model.title.trim().is_empty() {
            return None;
        }
        if model.description.trim().is_empty() {
            model.description = source_text.to_string();
        }
        for deadline in &mut model.deadlines {
            deadline.date = self.normalize_date(&deadline.date);
        }
        if model.deadlines.is_empty() {
            model.deadlines = self.extract_deadlines(source_text);
        }
        Some(model)
    }
}

#[async_trait]
impl Agent for Translator {
    fn name(&self) -> &'static str {
        "Translator"
    }

    async fn run(&self, state: &mut SharedState) -> Result<(), AgentError> {
        let prompt = prompts::translator(&state.regulatory_text);

        let model = match self.gateway.generate(&prompt, MAX_TOKENS).await {
            Ok(text) => self.parse_model(&text, &state.regulatory_text).unwrap_or_else(|| {
                warn!(execution_id = %state.execution_id, "translator parse miss, emitting minimal model");
                Self::minimal_model(&state.regulatory_text)
            }),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(execution_id = %state.execution_id, error = %e, "translator llm failure, emitting minimal model");
                Self::minimal_model(&state.regulatory_text)
            }
        };

        state.regulatory_model = Some(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::llm::LlmError;

    const TEXT: &str = "RESOLUÇÃO BCB Nº 789/2024\nEstabelece regras com prazo até 31/12/2024.";

    async fn run_with(
        script: Vec<Result<String, LlmError>>,
        text: &str,
    ) -> (SharedState, Result<(), AgentError>) {
        let backend = Arc::new(ScriptedLlm::new(script));
        let translator = Translator::new(Arc::new(Gateway::new(backend, 100)));
        let mut state = SharedState::new(text, "repo");
        let result = translator.run(&mut state).await;
        (state, result)
    }

    #[tokio::test]
    async fn test_parses_full_model() {
        let reply = r#"{
            "title": "Validação de chaves Pix",
            "description": "Novas regras",
            "requirements": ["Validar formato"],
            "deadlines": [{"date": "2024-12-31", "description": "vigência"}],
            "affected_systems": ["pix"]
        }"#;
        let (state, result) = run_with(vec![Ok(reply.into())], TEXT).await;
        result.unwrap();
        let model = state.regulatory_model.unwrap();
        assert_eq!(model.title, "Validação de chaves Pix");
        assert_eq!(model.requirements.len(), 1);
        assert_eq!(model.deadlines[0].date, "2024-12-31");
    }

    #[tokio::test]
    async fn test_model_roundtrips_through_json() {
        let reply = r#"{"title": "T", "description": "D", "requirements": ["r"],
            "deadlines": [], "affected_systems": []}"#;
        let (state, result) = run_with(vec![Ok(reply.into())], "Comunicado.").await;
        result.unwrap();
        let model = state.regulatory_model.unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: RegulatoryModel = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, model);
    }

    #[tokio::test]
    async fn test_brazilian_dates_normalized_to_iso() {
        let reply = r#"{"title": "T", "description": "D",
            "deadlines": [{"date": "31/12/2024", "description": "prazo"}]}"#;
        let (state, result) = run_with(vec![Ok(reply.into())], TEXT).await;
        result.unwrap();
        assert_eq!(
            state.regulatory_model.unwrap().deadlines[0].date,
            "2024-12-31"
        );
    }

    #[tokio::test]
    async fn test_missing_deadlines_recovered_from_text() {
        let reply = r#"{"title": "T", "description": "D"}"#;
        let (state, result) = run_with(vec![Ok(reply.into())], TEXT).await;
        result.unwrap();
        let deadlines = state.regulatory_model.unwrap().deadlines;
        assert_eq!(deadlines.len(), 1);
        assert_eq!(deadlines[0].date, "2024-12-31");
    }

    #[tokio::test]
    async fn test_parse_miss_yields_minimal_model() {
        let (state, result) = run_with(vec![Ok("garbage".into())], TEXT).await;
        result.unwrap();
        let model = state.regulatory_model.unwrap();
        assert_eq!(model.title, "RESOLUÇÃO BCB Nº 789/2024");
        assert_eq!(model.description, TEXT);
        assert!(model.requirements.is_empty());
        assert!(model.deadlines.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_after_retry_yields_minimal_model() {
        let (state, result) = run_with(
            vec![
                Err(LlmError::Unavailable("down".into())),
                Err(LlmError::Unavailable("down".into())),
            ],
            TEXT,
        )
        .await;
        result.unwrap();
        assert!(state.regulatory_model.is_some());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let (state, result) =
            run_with(vec![Err(LlmError::Auth("bad key".into()))], TEXT).await;
        assert!(result.is_err());
        assert!(state.regulatory_model.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_single_transient_failure() {
        let reply = r#"{"title": "T", "description": "D"}"#;
        let (state, result) = run_with(
            vec![Err(LlmError::Unavailable("blip".into())), Ok(reply.into())],
            "Comunicado.",
        )
        .await;
        result.unwrap();
        assert_eq!(state.regulatory_model.unwrap().title, "T");
    }
}
