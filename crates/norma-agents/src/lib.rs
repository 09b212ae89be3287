//! norma — deterministic multi-agent pipeline for regulatory impact
//! analysis.
//!
//! A free-form regulatory text goes in; out come a structured model of the
//! regulation, a ranked list of impacted source files, per-file impact
//! analyses, a Markdown technical specification, and an executable developer
//! prompt. Every run is audited under a unique execution id, including runs
//! that halt partway.
//!
//! Module map:
//! - [`state`] — the typed, serializable shared state threaded through the run
//! - [`agents`] — the six pipeline stages
//! - [`executor`] — fixed-sequence execution with error containment
//! - [`llm`] — pluggable gateway over ollama / openai / gemini
//! - [`audit`] — durable per-run snapshots
//! - [`service`] / [`server`] — orchestrator API and its HTTP surface

pub mod agents;
pub mod audit;
pub mod config;
pub mod executor;
pub mod llm;
pub mod prompts;
pub mod server;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod visualizer;

pub use config::PipelineConfig;
pub use service::{AnalysisOutcome, AnalysisService};
pub use state::SharedState;
