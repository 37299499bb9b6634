use async_trait::async_trait;
use automaton_core_types::{OrchestratorError, ScrollSpec, TargetCandidate, WaitSpec};

use crate::element::ElementInfo;
use crate::frame::Frame;

/// Seam a concrete browser driver plugs into. A real CDP/WebDriver backend
/// is out of scope here; this workspace ships the [`SimulatedDriver`]
/// reference implementation plus this trait for one to implement later.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Acquire the browser/page. Idempotent.
    async fn open(&self) -> Result<(), OrchestratorError>;

    /// Navigate the owned page; returns the observed URL after navigation.
    async fn navigate(&self, url: &str) -> Result<String, OrchestratorError>;

    /// All elements visible to a candidate-matching pass (used by target
    /// resolution) or to the interpreter's heuristic scorer.
    async fn query_elements(&self) -> Result<Vec<ElementInfo>, OrchestratorError>;

    async fn click(&self, element: &ElementInfo) -> Result<(), OrchestratorError>;
    async fn fill(&self, element: &ElementInfo, value: &str) -> Result<(), OrchestratorError>;
    async fn select(&self, element: &ElementInfo, option: &str) -> Result<(), OrchestratorError>;
    async fn extract_text(&self, element: &ElementInfo) -> Result<String, OrchestratorError>;
    async fn scroll(&self, spec: &ScrollSpec, element: Option<&ElementInfo>) -> Result<(), OrchestratorError>;
    async fn wait(&self, spec: &WaitSpec) -> Result<(), OrchestratorError>;
    async fn evaluate_predicate(&self, predicate: &str) -> Result<bool, OrchestratorError>;

    /// Dispatch one raw key press against the focused element. Used only by
    /// the Client Gateway's manual-mode `key_press` inbound message
    ///; unlike the other primitives this has no corresponding
    /// [`automaton_core_types::ActionKind`] variant and is never captured by
    /// the Recorder.
    async fn key_press(&self, key: &str) -> Result<(), OrchestratorError>;

    async fn current_url(&self) -> String;
    async fn current_title(&self) -> String;
    async fn snapshot(&self) -> Result<Frame, OrchestratorError>;

    /// Idempotent teardown; must release driver resources on every exit path.
    async fn close(&self) -> Result<(), OrchestratorError>;
}

/// Picks the elements matching one candidate out of a full page snapshot,
/// shared by any driver implementation rather than duplicated per driver.
pub fn candidates_matching<'a>(
    elements: &'a [ElementInfo],
    candidate: &TargetCandidate,
) -> Vec<ElementInfo> {
    if let TargetCandidate::Index { index } = candidate {
        return elements
            .get(*index)
            .filter(|e| e.is_visible())
            .cloned()
            .into_iter()
            .collect();
    }
    elements
        .iter()
        .filter(|e| e.is_visible() && e.matches(candidate))
        .cloned()
        .collect()
}
