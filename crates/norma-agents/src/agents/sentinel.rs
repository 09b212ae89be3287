//! Sentinel — change detection and risk classification.
//!
//! Input: `regulatory_text`. Output: `change_detected`, `risk_level`.
//!
//! The LLM is asked for `{change_detected, risk_level, reasoning}`; unknown
//! risk values are rejected and clamped to `medium`. A parse miss falls back
//! to a keyword heuristic over the raw text. Transient backend failure after
//! the gateway's retry is fatal — there is no trustworthy local answer for
//! risk classification.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::llm::{extract_json, Gateway};
use crate::prompts::{self, CHANGE_KEYWORDS};
use crate::state::{RiskLevel, SharedState};

use super::{Agent, AgentError};

const MAX_TOKENS: u32 = 512;

pub struct Sentinel {
    gateway: Arc<Gateway>,
}

impl Sentinel {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Keyword fallback when structured output cannot be recovered.
    fn heuristic(text: &str) -> (bool, RiskLevel) {
        let lowered = text.to_lowercase();
        let detected = CHANGE_KEYWORDS.iter().any(|k| lowered.contains(k));
        (detected, RiskLevel::Medium)
    }
}

#[async_trait]
impl Agent for Sentinel {
    fn name(&self) -> &'static str {
        "Sentinel"
    }

    async fn run(&self, state: &mut SharedState) -> Result<(), AgentError> {
        let prompt = prompts::sentinel(&state.regulatory_text);

        let (change_detected, risk_level) = match self.gateway.generate(&prompt, MAX_TOKENS).await
        {
            Ok(text) => match extract_json(&text) {
                Some(value) => {
                    let detected = value["change_detected"].as_bool().unwrap_or_else(|| {
                        Self::heuristic(&state.regulatory_text).0
                    });
                    let risk = value["risk_level"]
                        .as_str()
                        .and_then(RiskLevel::parse)
                        .unwrap_or(RiskLevel::Medium);
                    (detected, risk)
                }
                None => {
                    warn!(execution_id = %state.execution_id, "sentinel parse miss, using keyword heuristic");
                    Self::heuristic(&state.regulatory_text)
                }
            },
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(crate::llm::LlmError::EmptyResponse) => {
                warn!(execution_id = %state.execution_id, "sentinel got empty response, using keyword heuristic");
                Self::heuristic(&state.regulatory_text)
            }
            Err(e) => return Err(e.into()),
        };

        state.change_detected = Some(change_detected);
        state.risk_level = Some(risk_level);
        Ok(())
    }
}
