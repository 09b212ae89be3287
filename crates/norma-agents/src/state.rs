//! Shared pipeline state and its schema.
//!
//! One `SharedState` exists per run. It is created by the orchestrator,
//! handed to the graph executor, mutated by exactly one agent at a time, and
//! serialized on termination (success or failure). Every agent update must
//! keep it JSON-serializable; `validate()` is the schema gate the executor
//! applies after each agent.
//!
//! ## Field ownership
//!
//! | Field             | Written by     |
//! |-------------------|----------------|
//! | change_detected   | Sentinel       |
//! | risk_level        | Sentinel       |
//! | regulatory_model  | Translator     |
//! | impacted_files    | CodeReader     |
//! | impact_analysis   | Impact         |
//! | technical_spec    | SpecGenerator  |
//! | kiro_prompt       | PromptBuilder  |
//! | error             | executor only  |

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on retrieval results carried through the pipeline.
pub const MAX_IMPACTED_FILES: usize = 10;
/// Snippets are truncated to this many characters.
pub const SNIPPET_MAX_CHARS: usize = 200;

/// Regulatory risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Parse a model-produced value; unknown values are rejected with `None`
    /// so the caller can clamp to its default.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" | "baixo" => Some(Self::Low),
            "medium" | "medio" | "médio" => Some(Self::Medium),
            "high" | "alto" => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Technical category of a per-file impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactType {
    SchemaChange,
    BusinessLogic,
    Validation,
    ApiContract,
}

impl ImpactType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "schema_change" => Some(Self::SchemaChange),
            "business_logic" => Some(Self::BusinessLogic),
            "validation" => Some(Self::Validation),
            "api_contract" => Some(Self::ApiContract),
            _ => None,
        }
    }
}

impl fmt::Display for ImpactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaChange => write!(f, "schema_change"),
            Self::BusinessLogic => write!(f, "business_logic"),
            Self::Validation => write!(f, "validation"),
            Self::ApiContract => write!(f, "api_contract"),
        }
    }
}

/// Severity of a per-file impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" | "baixa" => Some(Self::Low),
            "medium" | "media" | "média" => Some(Self::Medium),
            "high" | "alta" => Some(Self::High),
            _ => None,
        }
    }

    /// Effort weight used by the spec generator.
    pub fn weight(self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A deadline extracted from the regulation, date in ISO `YYYY-MM-DD` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
    pub date: String,
    pub description: String,
}

/// Structured projection of the regulatory text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryModel {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub deadlines: Vec<Deadline>,
    #[serde(default)]
    pub affected_systems: Vec<String>,
}

/// One retrieval hit carried into the analysis stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactedFile {
    pub file_path: String,
    pub relevance_score: f32,
    pub snippet: String,
}

/// Per-file technical consequence of the regulatory change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    pub file_path: String,
    pub impact_type: ImpactType,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub suggested_changes: Vec<String>,
}

/// Section headings the technical spec must carry, in order.
pub const SPEC_SECTIONS: [&str; 5] = [
    "## Overview",
    "## Affected Components",
    "## Required Changes",
    "## Acceptance Criteria",
    "## Estimated Effort",
];

/// Section labels the developer prompt must carry.
pub const PROMPT_SECTIONS: [&str; 6] = [
    "CONTEXT",
    "OBJECTIVE",
    "SPECIFIC INSTRUCTIONS",
    "FILE MODIFICATIONS",
    "VALIDATION STEPS",
    "CONSTRAINTS",
];

/// The single mutable record threaded through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    pub execution_id: String,
    pub regulatory_text: String,
    pub repo_path: String,
    pub execution_timestamp: DateTime<Utc>,
    pub change_detected: Option<bool>,
    pub risk_level: Option<RiskLevel>,
    pub regulatory_model: Option<RegulatoryModel>,
    #[serde(default)]
    pub impacted_files: Vec<ImpactedFile>,
    #[serde(default)]
    pub impact_analysis: Vec<Impact>,
    pub technical_spec: Option<String>,
    pub kiro_prompt: Option<String>,
    pub error: Option<String>,
}

impl SharedState {
    /// Fresh state for a new run with a unique 36-char execution id.
    pub fn new(regulatory_text: impl Into<String>, repo_path: impl Into<String>) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            regulatory_text: regulatory_text.into(),
            repo_path: repo_path.into(),
            execution_timestamp: Utc::now(),
            change_detected: None,
            risk_level: None,
            regulatory_model: None,
            impacted_files: Vec::new(),
            impact_analysis: Vec::new(),
            technical_spec: None,
            kiro_prompt: None,
            error: None,
        }
    }

    /// Record a fatal error as `"<AgentName>: <message>"`.
    ///
    /// A prior error is never overwritten; later failures on an already
    /// failed run are dropped.
    pub fn record_error(&mut self, agent: &str, message: &str) {
        if self.error.is_none() {
            self.error = Some(format!("{agent}: {message}"));
        }
    }

    /// Validate the state against its schema. Returns the list of
    /// violations; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.execution_id.len() != 36 {
            violations.push(format!(
                "execution_id must be 36 chars, got {}",
                self.execution_id.len()
            ));
        }
        if self.regulatory_text.trim().is_empty() {
            violations.push("regulatory_text must not be empty".into());
        }
        if self.change_detected.is_some() && self.risk_level.is_none() {
            violations.push("risk_level missing after change detection".into());
        }

        if self.impacted_files.len() > MAX_IMPACTED_FILES {
            violations.push(format!(
                "impacted_files exceeds cap of {MAX_IMPACTED_FILES}"
            ));
        }
        let mut prev_score = f32::INFINITY;
        for file in &self.impacted_files {
            if file.file_path.is_empty() {
                violations.push("impacted file with empty path".into());
            }
            if !(0.0..=1.0).contains(&file.relevance_score) {
                violations.push(format!(
                    "relevance_score {} out of [0, 1] for {}",
                    file.relevance_score, file.file_path
                ));
            }
            if file.relevance_score > prev_score {
                violations.push("relevance scores must be non-increasing".into());
            }
            prev_score = file.relevance_score;
            if file.snippet.chars().count() > SNIPPET_MAX_CHARS {
                violations.push(format!("snippet over {SNIPPET_MAX_CHARS} chars"));
            }
        }

        let known_paths: HashSet<&str> = self
            .impacted_files
            .iter()
            .map(|f| f.file_path.as_str())
            .collect();
        for impact in &self.impact_analysis {
            if !known_paths.contains(impact.file_path.as_str()) {
                violations.push(format!(
                    "impact references unknown file {}",
                    impact.file_path
                ));
            }
        }

        if let Some(spec) = &self.technical_spec {
            let mut cursor = 0usize;
            for heading in SPEC_SECTIONS {
                match spec[cursor..].find(heading) {
                    Some(pos) => cursor += pos + heading.len(),
                    None => {
                        violations.push(format!("technical_spec missing section {heading:?}"));
                    }
                }
            }
            for impact in &self.impact_analysis {
                if !spec.contains(&impact.file_path) {
                    violations.push(format!(
                        "technical_spec does not mention {}",
                        impact.file_path
                    ));
                }
            }
        }

        if let Some(prompt) = &self.kiro_prompt {
            for label in PROMPT_SECTIONS {
                if !prompt.contains(label) {
                    violations.push(format!("kiro_prompt missing section {label:?}"));
                }
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_state() -> SharedState {
        SharedState::new("Resolução BCB nº 789/2024", "fake-pix-repo")
    }

    #[test]
    fn test_new_state_has_unique_36_char_id() {
        let a = base_state();
        let b = base_state();
        assert_eq!(a.execution_id.len(), 36);
        assert_ne!(a.execution_id, b.execution_id);
        assert!(a.validate().is_empty());
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let mut state = base_state();
        state.change_detected = Some(true);
        state.risk_level = Some(RiskLevel::High);
        state.regulatory_model = Some(RegulatoryModel {
            title: "Validação de chaves Pix".into(),
            description: "Novas regras".into(),
            requirements: vec!["Validar formato".into()],
            deadlines: vec![Deadline {
                date: "2024-12-31".into(),
                description: "prazo final".into(),
            }],
            affected_systems: vec!["pix".into()],
        });
        state.impacted_files = vec![ImpactedFile {
            file_path: "domain/validators.py".into(),
            relevance_score: 0.9,
            snippet: "def validate".into(),
        }];
        state.impact_analysis = vec![Impact {
            file_path: "domain/validators.py".into(),
            impact_type: ImpactType::Validation,
            severity: Severity::High,
            description: "new key format checks".into(),
            suggested_changes: vec!["add format rule".into()],
        }];

        let json = serde_json::to_string(&state).unwrap();
        let restored: SharedState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_regulatory_model_roundtrip() {
        let model = RegulatoryModel {
            title: "t".into(),
            description: "d".into(),
            requirements: vec![],
            deadlines: vec![],
            affected_systems: vec![],
        };
        let json = serde_json::to_string(&model).unwrap();
        let restored: RegulatoryModel = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, model);
    }

    #[test]
    fn test_record_error_never_overwrites() {
        let mut state = base_state();
        state.record_error("Sentinel", "first failure");
        state.record_error("Impact", "second failure");
        assert_eq!(state.error.as_deref(), Some("Sentinel: first failure"));
    }

    #[test]
    fn test_validate_rejects_missing_risk_after_detection() {
        let mut state = base_state();
        state.change_detected = Some(true);
        let violations = state.validate();
        assert!(violations.iter().any(|v| v.contains("risk_level")));
    }

    #[test]
    fn test_validate_rejects_out_of_range_score() {
        let mut state = base_state();
        state.impacted_files = vec![ImpactedFile {
            file_path: "a.py".into(),
            relevance_score: 1.4,
            snippet: String::new(),
        }];
        assert!(!state.validate().is_empty());
    }

    #[test]
    fn test_validate_rejects_increasing_scores() {
        let mut state = base_state();
        state.impacted_files = vec![
            ImpactedFile {
                file_path: "a.py".into(),
                relevance_score: 0.5,
                snippet: String::new(),
            },
            ImpactedFile {
                file_path: "b.py".into(),
                relevance_score: 0.9,
                snippet: String::new(),
            },
        ];
        assert!(state
            .validate()
            .iter()
            .any(|v| v.contains("non-increasing")));
    }

    #[test]
    fn test_validate_rejects_impact_on_unknown_file() {
        let mut state = base_state();
        state.impact_analysis = vec![Impact {
            file_path: "ghost.py".into(),
            impact_type: ImpactType::BusinessLogic,
            severity: Severity::Low,
            description: String::new(),
            suggested_changes: vec![],
        }];
        assert!(state
            .validate()
            .iter()
            .any(|v| v.contains("unknown file")));
    }

    #[test]
    fn test_validate_requires_spec_sections_in_order() {
        let mut state = base_state();
        state.technical_spec = Some(
            "## Overview\n## Required Changes\n## Affected Components\n\
             ## Acceptance Criteria\n## Estimated Effort"
                .into(),
        );
        // "Affected Components" appears after "Required Changes", so the
        // ordered scan cannot find the later headings from its cursor.
        assert!(!state.validate().is_empty());
    }

    #[test]
    fn test_validate_requires_prompt_labels() {
        let mut state = base_state();
        state.kiro_prompt = Some("CONTEXT\nOBJECTIVE".into());
        assert!(state
            .validate()
            .iter()
            .any(|v| v.contains("kiro_prompt")));
    }

    #[test]
    fn test_enum_parsing_rejects_unknown_values() {
        assert_eq!(RiskLevel::parse("critical"), None);
        assert_eq!(RiskLevel::parse("HIGH"), Some(RiskLevel::High));
        assert_eq!(ImpactType::parse("refactor"), None);
        assert_eq!(Severity::parse("média"), Some(Severity::Medium));
    }

    #[test]
    fn test_severity_weights() {
        assert_eq!(Severity::Low.weight(), 1);
        assert_eq!(Severity::Medium.weight(), 2);
        assert_eq!(Severity::High.weight(), 3);
    }
}
