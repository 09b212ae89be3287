//! Graph executor — fixed-sequence agent execution with error containment.
//!
//! Agents run strictly in order; none is ever skipped, reordered, or invoked
//! concurrently, so each agent observes exactly the mutations of its
//! predecessor. After every agent the shared state is validated against its
//! schema; a violation is as fatal as an agent raising. Fatal failures set
//! `state.error = "<AgentName>: <message>"` (never overwriting an earlier
//! error) and the partial state is returned rather than lost.
//!
//! Structured events per stage: `agent_start`, then `agent_end` with
//! `ok|error` status and `duration_ms`.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info};

use crate::agents::Agent;
use crate::state::SharedState;

/// Timing record for one executed stage, kept for the run response.
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub agent: &'static str,
    pub ok: bool,
    pub duration_ms: u64,
}

/// Drives a pipeline of agents over one shared state.
pub struct GraphExecutor {
    agents: Vec<Arc<dyn Agent>>,
}

impl GraphExecutor {
    pub fn new(agents: Vec<Arc<dyn Agent>>) -> Self {
        Self { agents }
    }

    /// Agent names in execution order (used by the visualizer).
    pub fn agent_names(&self) -> Vec<&'static str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    /// Run every agent in order, halting on the first fatal failure.
    ///
    /// Always returns the state — partial when halted — plus the per-stage
    /// timings for the stages that ran.
    pub async fn execute(&self, mut state: SharedState) -> (SharedState, Vec<StageTiming>) {
        let mut timings = Vec::with_capacity(self.agents.len());

        for agent in &self.agents {
            let name = agent.name();
            info!(agent = name, execution_id = %state.execution_id, "agent_start");
            let started = Instant::now();

            let outcome = agent.run(&mut state).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let failure = match outcome {
                Ok(()) => {
                    let violations = state.validate();
                    if violations.is_empty() {
                        None
                    } else {
                        Some(format!("schema violation: {}", violations.join("; ")))
                    }
                }
                Err(e) => Some(e.to_string()),
            };

            match failure {
                None => {
                    info!(
                        agent = name,
                        execution_id = %state.execution_id,
                        status = "ok",
                        duration_ms,
                        "agent_end"
                    );
                    timings.push(StageTiming {
                        agent: name,
                        ok: true,
                        duration_ms,
                    });
                }
                Some(message) => {
                    error!(
                        agent = name,
                        execution_id = %state.execution_id,
                        status = "error",
                        duration_ms,
                        error = %message,
                        "agent_end"
                    );
                    timings.push(StageTiming {
                        agent: name,
                        ok: false,
                        duration_ms,
                    });
                    state.record_error(name, &message);
                    break;
                }
            }
        }

        (state, timings)
    }
}
