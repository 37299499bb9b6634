use std::collections::HashMap;

use async_trait::async_trait;
use automaton_core_types::{FrameIdx, OrchestratorError, ScrollSpec, WaitSpec};
use parking_lot::Mutex;

use crate::driver::BrowserDriver;
use crate::element::ElementInfo;
use crate::frame::Frame;

struct SeededElement {
    info: ElementInfo,
    /// Becomes visible only once `query_count >= visible_after`. Models
    /// elements that render in after a delay, used to exercise the Worker's
    /// retry/backoff path.
    visible_after: u64,
}

struct State {
    url: String,
    title: String,
    elements: Vec<SeededElement>,
    query_count: u64,
    opened: bool,
}

/// Reference in-memory driver used by tests and as a fallback when no real
/// browser driver is configured.
pub struct SimulatedDriver {
    state: Mutex<State>,
}

impl SimulatedDriver {
    pub fn new(initial_url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State {
                url: initial_url.into(),
                title: "Simulated Page".into(),
                elements: Vec::new(),
                query_count: 0,
                opened: false,
            }),
        }
    }

    /// Seed a single always-visible element matched by CSS selector.
    pub fn seed_element(&self, selector: &str, tag: &str, accessible_name: Option<&str>, area: f64) {
        let mut state = self.state.lock();
        let order = state.elements.len();
        state.elements.push(SeededElement {
            info: ElementInfo {
                selector: selector.to_string(),
                tag: tag.to_string(),
                role: None,
                accessible_name: accessible_name.map(|s| s.to_string()),
                aria_label: None,
                placeholder: None,
                text: accessible_name.unwrap_or_default().to_string(),
                attrs: HashMap::new(),
                visible: true,
                area,
                document_order: order,
            },
            visible_after: 0,
        });
    }

    /// Never seeds `primary_selector`; `fallback_selector` only becomes
    /// visible after `fail_queries` resolution attempts have already missed.
    pub fn seed_flaky_then_fallback(&self, _primary_selector: &str, fallback_selector: &str, fail_queries: u64) {
        let mut state = self.state.lock();
        let order = state.elements.len();
        state.elements.push(SeededElement {
            info: ElementInfo {
                selector: fallback_selector.to_string(),
                tag: "button".to_string(),
                role: None,
                accessible_name: None,
                aria_label: None,
                placeholder: None,
                text: String::new(),
                attrs: HashMap::new(),
                visible: true,
                area: 50.0,
                document_order: order,
            },
            visible_after: fail_queries,
        });
    }
}

#[async_trait]
impl BrowserDriver for SimulatedDriver {
    async fn open(&self) -> Result<(), OrchestratorError> {
        self.state.lock().opened = true;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<String, OrchestratorError> {
        let mut state = self.state.lock();
        state.url = url.to_string();
        Ok(state.url.clone())
    }

    async fn query_elements(&self) -> Result<Vec<ElementInfo>, OrchestratorError> {
        let mut state = self.state.lock();
        state.query_count += 1;
        let count = state.query_count;
        Ok(state
            .elements
            .iter()
            .map(|seeded| {
                let mut info = seeded.info.clone();
                if count < seeded.visible_after {
                    info.visible = false;
                }
                info
            })
            .collect())
    }

    async fn click(&self, _element: &ElementInfo) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn fill(&self, _element: &ElementInfo, _value: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn select(&self, _element: &ElementInfo, _option: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn extract_text(&self, element: &ElementInfo) -> Result<String, OrchestratorError> {
        Ok(element.text.clone())
    }

    async fn scroll(&self, _spec: &ScrollSpec, _element: Option<&ElementInfo>) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn wait(&self, spec: &WaitSpec) -> Result<(), OrchestratorError> {
        match spec {
            WaitSpec::Duration { millis } => {
                tokio::time::sleep(std::time::Duration::from_millis((*millis).min(50))).await;
                Ok(())
            }
            WaitSpec::Predicate { .. } => Ok(()),
        }
    }

    async fn evaluate_predicate(&self, _predicate: &str) -> Result<bool, OrchestratorError> {
        Ok(true)
    }

    async fn key_press(&self, _key: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn current_url(&self) -> String {
        self.state.lock().url.clone()
    }

    async fn current_title(&self) -> String {
        self.state.lock().title.clone()
    }

    async fn snapshot(&self) -> Result<Frame, OrchestratorError> {
        let state = self.state.lock();
        Ok(Frame {
            id: FrameIdx(0),
            url: state.url.clone(),
            title: state.title.clone(),
            data_base64: String::new(),
        })
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        self.state.lock().opened = false;
        Ok(())
    }
}
