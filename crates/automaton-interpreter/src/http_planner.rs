//! HTTP-backed tier 3 planner: a `reqwest::Client` built once with a fixed
//! timeout, a bearer-authenticated POST to a configurable endpoint, and the
//! response parsed into this crate's own types rather than passed through.

use std::time::Duration;

use async_trait::async_trait;
use automaton_browser_worker::ElementInfo;
use automaton_core_types::{ActionKind, OrchestratorError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::planner::LlmPlanner;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpLlmPlanner {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpLlmPlanner {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, endpoint, api_key }
    }
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    instruction: &'a str,
    elements: Vec<ElementSummary>,
}

#[derive(Serialize)]
struct ElementSummary {
    selector: String,
    tag: String,
    accessible_name: Option<String>,
    text: String,
}

impl From<&ElementInfo> for ElementSummary {
    fn from(element: &ElementInfo) -> Self {
        Self {
            selector: element.selector.clone(),
            tag: element.tag.clone(),
            accessible_name: element.accessible_name.clone(),
            text: element.text.clone(),
        }
    }
}

#[derive(Deserialize)]
struct PlanResponse {
    actions: Vec<ActionKind>,
}

#[async_trait]
impl LlmPlanner for HttpLlmPlanner {
    async fn plan(
        &self,
        instruction: &str,
        elements: &[ElementInfo],
    ) -> Result<Vec<ActionKind>, OrchestratorError> {
        let body = PlanRequest { instruction, elements: elements.iter().map(ElementSummary::from).collect() };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| OrchestratorError::Driver {
            reason: format!("llm planner request failed: {err}"),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(%status, "llm planner endpoint returned a non-success status");
            return Err(OrchestratorError::Driver { reason: format!("llm planner returned {status}") });
        }

        let parsed: PlanResponse = response
            .json()
            .await
            .map_err(|err| OrchestratorError::Driver { reason: format!("llm planner response invalid: {err}") })?;
        Ok(parsed.actions)
    }
}
