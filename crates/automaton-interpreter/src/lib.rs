//! Maps a user instruction and the current page context to a concrete
//! [`ActionKind`] (or a rejection), via a tiered pipeline: a direct regex
//! match, then heuristic element scoring, then a pluggable LLM planner
//! memoized for the session's lifetime.

pub mod cache;
pub mod http_planner;
pub mod planner;
pub mod tier1;
pub mod tier2;

use std::sync::Arc;

use automaton_browser_worker::ElementInfo;
use automaton_core_types::{ActionKind, OrchestratorError, ScoredCandidate};
use tracing::{debug, warn};

pub use cache::PlannerCache;
pub use http_planner::HttpLlmPlanner;
pub use planner::{LlmPlanner, NullPlanner};
pub use tier2::{HeuristicOutcome, ScoredElement};

/// Tiered instruction interpreter. Tier 1 and tier 2 are pure functions of
/// their inputs; tier 3 is backed by a pluggable [`LlmPlanner`] and its
/// results are memoized in a [`PlannerCache`] for the session's lifetime.
pub struct Interpreter {
    planner: Arc<dyn LlmPlanner>,
    cache: PlannerCache,
}

impl Interpreter {
    pub fn new(planner: Arc<dyn LlmPlanner>) -> Self {
        Self { planner, cache: PlannerCache::new() }
    }

    pub fn with_default_planner() -> Self {
        Self::new(Arc::new(NullPlanner))
    }

    /// Resolve an instruction against the current page snapshot. `build`
    /// turns a resolved `Target` into the concrete click/fill/etc action
    /// tier 2 should construct; most instructions imply `click` for bare
    /// references, so callers pass that default in.
    pub async fn interpret(
        &self,
        instruction: &str,
        elements: &[ElementInfo],
        build: impl Fn(automaton_core_types::Target) -> ActionKind,
    ) -> Result<Vec<ActionKind>, OrchestratorError> {
        if let Some(action) = tier1::match_direct(instruction) {
            debug!(instruction, "resolved via tier 1 direct pattern match");
            return Ok(vec![action]);
        }

        match tier2::resolve_heuristic(instruction, elements, &build) {
            HeuristicOutcome::Action(action) => {
                debug!(instruction, "resolved via tier 2 heuristic match");
                return Ok(vec![action]);
            }
            HeuristicOutcome::Ambiguous(candidates) => {
                return Err(OrchestratorError::Ambiguous {
                    instruction: instruction.to_string(),
                    candidates: to_scored_candidates(candidates),
                });
            }
            HeuristicOutcome::NoMatch => {}
        }

        if let Some(cached) = self.cache.get(instruction, elements) {
            debug!(instruction, "resolved via cached tier 3 plan");
            return Ok(cached);
        }

        match self.planner.plan(instruction, elements).await {
            Ok(plan) if !plan.is_empty() => {
                self.cache.put(instruction, elements, plan.clone());
                Ok(plan)
            }
            Ok(_) | Err(_) => {
                warn!(instruction, "planner unavailable, falling back to best-effort tier 2 candidate");
                best_effort_fallback(instruction, elements, &build)
            }
        }
    }
}

fn best_effort_fallback(
    instruction: &str,
    elements: &[ElementInfo],
    build: &impl Fn(automaton_core_types::Target) -> ActionKind,
) -> Result<Vec<ActionKind>, OrchestratorError> {
    let scored = tier2::score_all(instruction, elements);
    match scored.into_iter().next() {
        Some(top) => {
            let target = automaton_core_types::Target::new(
                automaton_core_types::TargetCandidate::Selector { selector: top.element.selector },
            );
            Ok(vec![build(target)])
        }
        None => Err(OrchestratorError::Unrecognized { instruction: instruction.to_string() }),
    }
}

fn to_scored_candidates(candidates: Vec<ScoredElement>) -> Vec<ScoredCandidate> {
    candidates
        .into_iter()
        .map(|c| ScoredCandidate { description: c.element.selector, score: c.score })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use automaton_core_types::ActionKind;
    use std::collections::HashMap;

    fn element(selector: &str, text: &str) -> ElementInfo {
        ElementInfo {
            selector: selector.to_string(),
            tag: "button".to_string(),
            role: None,
            accessible_name: None,
            aria_label: None,
            placeholder: None,
            text: text.to_string(),
            attrs: HashMap::new(),
            visible: true,
            area: 100.0,
            document_order: 0,
        }
    }

    #[tokio::test]
    async fn tier1_wins_over_tier2_when_both_could_apply() {
        let interpreter = Interpreter::with_default_planner();
        let elements = vec![element("#go", "go to dashboard")];
        let plan = interpreter
            .interpret("go to example.com", &elements, |target| ActionKind::Click { target })
            .await
            .unwrap();
        assert!(matches!(plan.as_slice(), [ActionKind::Navigate { .. }]));
    }

    #[tokio::test]
    async fn unresolvable_instruction_falls_back_to_unrecognized() {
        let interpreter = Interpreter::with_default_planner();
        let plan = interpreter
            .interpret("do something inscrutable", &[], |target| ActionKind::Click { target })
            .await;
        assert!(matches!(plan, Err(OrchestratorError::Unrecognized { .. })));
    }
}
