use async_trait::async_trait;
use automaton_browser_worker::ElementInfo;
use automaton_core_types::{ActionKind, OrchestratorError};

/// Abstraction over an external strategy planner, tier 3 of the interpreter
/// pipeline. A narrow request/response seam so the concrete vendor
/// integration stays outside this crate.
#[async_trait]
pub trait LlmPlanner: Send + Sync {
    /// Produce a sequence of actions for an instruction the earlier tiers
    /// could not resolve, given the current page snapshot.
    async fn plan(
        &self,
        instruction: &str,
        elements: &[ElementInfo],
    ) -> Result<Vec<ActionKind>, OrchestratorError>;
}

/// Default planner used when no external endpoint is configured. Always
/// reports itself unable to resolve, so the interpreter falls through to
/// its best-effort tier 2 candidate.
#[derive(Debug, Default, Clone)]
pub struct NullPlanner;

#[async_trait]
impl LlmPlanner for NullPlanner {
    async fn plan(
        &self,
        instruction: &str,
        _elements: &[ElementInfo],
    ) -> Result<Vec<ActionKind>, OrchestratorError> {
        Err(OrchestratorError::Unrecognized { instruction: instruction.to_string() })
    }
}
