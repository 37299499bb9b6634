use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use automaton_core_types::{
    ActionKind, ActionResult, FailureKind, FrameIdx, OrchestratorError, ScrollSpec, Target,
    TargetCandidate,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::driver::{candidates_matching, BrowserDriver};
use crate::element::tie_break;
use crate::frame::Frame;

const RETRY_BASE_BACKOFF: Duration = Duration::from_millis(250);
const MAX_RETRIES: u32 = 2;

/// Per-session serializer owning one browser page. The
/// `slot` mutex is the "single-slot mailbox": a non-blocking `try_lock`
/// rejects re-entrant or concurrent calls with `Busy` rather than queueing,
/// which pushes ordering responsibility onto the session dispatcher.
pub struct Worker<D: BrowserDriver> {
    driver: Arc<D>,
    slot: Mutex<()>,
    frame_seq: AtomicU64,
}

impl<D: BrowserDriver> Worker<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            slot: Mutex::new(()),
            frame_seq: AtomicU64::new(0),
        }
    }

    pub async fn open(&self) -> Result<(), OrchestratorError> {
        self.driver.open().await
    }

    pub async fn close(&self) -> Result<(), OrchestratorError> {
        self.driver.close().await
    }

    /// Execute exactly one action against the given deadline, retrying
    /// through each fallback candidate before reporting a failed result.
    pub async fn execute(
        &self,
        action: &ActionKind,
        deadline: Instant,
    ) -> Result<ActionResult, OrchestratorError> {
        let _guard = self.slot.try_lock().map_err(|_| OrchestratorError::Busy)?;
        let started = Instant::now();

        let mut attempt_log = Vec::new();
        let mut attempt = 0u32;
        loop {
            if Instant::now() >= deadline {
                return Ok(ActionResult::failure(
                    FailureKind::Timeout,
                    elapsed_ms(started),
                    attempt_log,
                ));
            }

            let outcome = self.execute_once(action, &mut attempt_log).await;
            match outcome {
                Ok((observed_url, used)) => {
                    return Ok(ActionResult::success(observed_url, used, elapsed_ms(started)));
                }
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    let backoff = RETRY_BASE_BACKOFF * 2u32.pow(attempt);
                    debug!(attempt, ?backoff, "retrying action after retryable failure");
                    tokio::time::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())))
                        .await;
                    attempt += 1;
                }
                Err(err) => {
                    let kind = failure_kind_for(&err);
                    return Ok(ActionResult::failure(kind, elapsed_ms(started), attempt_log));
                }
            }
        }
    }

    async fn execute_once(
        &self,
        action: &ActionKind,
        attempt_log: &mut Vec<String>,
    ) -> Result<(Option<String>, Option<TargetCandidate>), OrchestratorError> {
        match action {
            ActionKind::Navigate { url } => {
                let observed = self.driver.navigate(url).await?;
                Ok((Some(observed), None))
            }
            ActionKind::Fill { target, value } => {
                let (element, used) = self.resolve(target, attempt_log).await?;
                self.driver.fill(&element, value).await?;
                Ok((Some(self.driver.current_url().await), Some(used)))
            }
            ActionKind::Click { target } => {
                let (element, used) = self.resolve(target, attempt_log).await?;
                self.driver.click(&element).await?;
                Ok((Some(self.driver.current_url().await), Some(used)))
            }
            ActionKind::Select { target, option } => {
                let (element, used) = self.resolve(target, attempt_log).await?;
                self.driver.select(&element, option).await?;
                Ok((Some(self.driver.current_url().await), Some(used)))
            }
            ActionKind::Extract { target, .. } => {
                let (element, used) = self.resolve(target, attempt_log).await?;
                // The extracted text is threaded back by the caller via the
                // Variable Resolver; the Worker only confirms resolution here.
                let _ = self.driver.extract_text(&element).await?;
                Ok((Some(self.driver.current_url().await), Some(used)))
            }
            ActionKind::Wait { spec } => {
                self.driver.wait(spec).await?;
                Ok((Some(self.driver.current_url().await), None))
            }
            ActionKind::Scroll { spec } => {
                let element = match spec {
                    ScrollSpec::Target { target } => {
                        let (element, used) = self.resolve(target, attempt_log).await?;
                        self.driver.scroll(spec, Some(&element)).await?;
                        return Ok((Some(self.driver.current_url().await), Some(used)));
                    }
                    ScrollSpec::Direction { .. } => None,
                };
                self.driver.scroll(spec, element.as_ref()).await?;
                Ok((Some(self.driver.current_url().await), None))
            }
            ActionKind::Assert { predicate } => {
                let ok = self.driver.evaluate_predicate(predicate).await?;
                if ok {
                    Ok((Some(self.driver.current_url().await), None))
                } else {
                    Err(OrchestratorError::TargetNotFound {
                        attempts: vec![format!("assert predicate failed: {predicate}")],
                    })
                }
            }
        }
    }

    /// Resolve a [`Target`] by trying candidates in order.
    async fn resolve(
        &self,
        target: &Target,
        attempt_log: &mut Vec<String>,
    ) -> Result<(crate::element::ElementInfo, TargetCandidate), OrchestratorError> {
        let elements = self.driver.query_elements().await?;
        for candidate in target.candidates() {
            let matches = candidates_matching(&elements, candidate);
            attempt_log.push(format!("{candidate} -> {} match(es)", matches.len()));
            if let Some(chosen) = tie_break(matches) {
                return Ok((chosen, candidate.clone()));
            }
        }
        Err(OrchestratorError::TargetNotFound {
            attempts: attempt_log.clone(),
        })
    }

    /// Dispatch one raw key press through the same serialization boundary as
    /// [`Worker::execute`], without the target-resolution/retry machinery
    /// `execute` applies to canonical [`ActionKind`]s.
    pub async fn send_key(&self, key: &str, deadline: Instant) -> Result<ActionResult, OrchestratorError> {
        let _guard = self.slot.try_lock().map_err(|_| OrchestratorError::Busy)?;
        let started = Instant::now();
        if Instant::now() >= deadline {
            return Ok(ActionResult::failure(FailureKind::Timeout, elapsed_ms(started), vec![]));
        }
        match self.driver.key_press(key).await {
            Ok(()) => Ok(ActionResult::success(Some(self.driver.current_url().await), None, elapsed_ms(started))),
            Err(err) => {
                let kind = failure_kind_for(&err);
                Ok(ActionResult::failure(kind, elapsed_ms(started), vec![]))
            }
        }
    }

    /// Page snapshot for the Action Interpreter's heuristic tier. Read-only and outside the single-slot mailbox: scoring a
    /// snapshot doesn't drive the page, so it doesn't need to serialize
    /// against in-flight actions.
    pub async fn query_elements(&self) -> Result<Vec<crate::element::ElementInfo>, OrchestratorError> {
        self.driver.query_elements().await
    }

    pub async fn snapshot(&self) -> Result<Frame, OrchestratorError> {
        let mut frame = self.driver.snapshot().await?;
        frame.id = FrameIdx(self.frame_seq.fetch_add(1, Ordering::Relaxed));
        Ok(frame)
    }

    pub async fn current_url(&self) -> String {
        self.driver.current_url().await
    }

    pub async fn current_title(&self) -> String {
        self.driver.current_title().await
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn failure_kind_for(err: &OrchestratorError) -> FailureKind {
    match err {
        OrchestratorError::TargetNotFound { .. } => FailureKind::TargetNotFound,
        OrchestratorError::Timeout => FailureKind::Timeout,
        OrchestratorError::Navigation { .. } => FailureKind::Navigation,
        OrchestratorError::Cancelled => FailureKind::Cancelled,
        _ => FailureKind::Driver,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedDriver;
    use automaton_core_types::{ActionKind, Target, TargetCandidate};

    fn deadline(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn click_resolves_primary_selector() {
        let driver = Arc::new(SimulatedDriver::new("https://example.test"));
        driver.seed_element("#submit", "button", Some("Submit"), 100.0);
        let worker = Worker::new(driver);
        worker.open().await.unwrap();

        let action = ActionKind::Click {
            target: Target::new(TargetCandidate::Selector { selector: "#submit".into() }),
        };
        let result = worker.execute(&action, deadline(5)).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn busy_rejects_concurrent_entry() {
        let driver = Arc::new(SimulatedDriver::new("https://example.test"));
        let worker = Arc::new(Worker::new(driver));
        worker.open().await.unwrap();

        let _guard = worker.slot.try_lock().unwrap();
        let action = ActionKind::Wait { spec: automaton_core_types::WaitSpec::Duration { millis: 1 } };
        let err = worker.execute(&action, deadline(1)).await;
        assert!(matches!(err, Err(OrchestratorError::Busy)));
    }

    #[tokio::test]
    async fn missing_target_fails_with_attempt_log() {
        let driver = Arc::new(SimulatedDriver::new("https://example.test"));
        let worker = Worker::new(driver);
        worker.open().await.unwrap();

        let action = ActionKind::Click {
            target: Target::new(TargetCandidate::Selector { selector: "#ghost".into() }),
        };
        let result = worker.execute(&action, deadline(5)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::TargetNotFound));
        assert!(!result.attempt_log.is_empty());
    }

    #[tokio::test]
    async fn transient_target_miss_recovers_via_fallback() {
        let driver = Arc::new(SimulatedDriver::new("https://example.test"));
        driver.seed_flaky_then_fallback("#primary", "#fallback", 1);
        let worker = Worker::new(driver);
        worker.open().await.unwrap();

        let action = ActionKind::Click {
            target: Target::with_fallbacks(
                TargetCandidate::Selector { selector: "#primary".into() },
                vec![TargetCandidate::Selector { selector: "#fallback".into() }],
            ),
        };
        let result = worker.execute(&action, deadline(5)).await.unwrap();
        assert!(result.success);
    }
}
