//! Drives a persisted [`Script`] through the Progress Manager's state
//! machine one step at a time. The state
//! machine itself, its pause/stop signaling, and the bounded history live in
//! `automaton-progress`; this module is the single-consumer loop that feeds
//! it: a plain `tokio::spawn`ed async function closed over the services it
//! needs, rather than a dedicated actor type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use automaton_browser_worker::BrowserDriver;
use automaton_core_types::{ActionResult, FailureKind, OrchestratorError, Script, StepLogEntry};
use automaton_progress::ProgressManager;
use automaton_screenshot::ScreenshotStreamer;
use automaton_script_store::ScriptStore;
use automaton_session::Session;
use chrono::Utc;
use tracing::{info, warn};

/// Resolve every schema variable to a concrete value: caller-supplied first,
/// then the schema default.
fn resolved_values(script: &Script, supplied: &HashMap<String, String>) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for variable in &script.schema.variables {
        if let Some(value) = supplied.get(&variable.name) {
            values.insert(variable.name.clone(), value.clone());
        } else if let Some(default) = &variable.default {
            values.insert(variable.name.clone(), default.clone());
        }
    }
    values
}

/// Dry-run every action's variable substitution against `values`, collecting
/// every unresolved name across the whole script rather than failing on the
/// first one. Nothing here touches the Worker.
fn missing_variables(script: &Script, values: &HashMap<String, String>) -> Vec<String> {
    let mut missing = Vec::new();
    for action in &script.actions {
        if let Err(OrchestratorError::MissingVariable { missing: names }) =
            automaton_variables::resolve_action(&action.kind, values)
        {
            for name in names {
                if !missing.contains(&name) {
                    missing.push(name);
                }
            }
        }
    }
    missing
}

fn error_for_failure(result: &ActionResult) -> OrchestratorError {
    match result.failure {
        Some(FailureKind::TargetNotFound) => {
            OrchestratorError::TargetNotFound { attempts: result.attempt_log.clone() }
        }
        Some(FailureKind::Timeout) => OrchestratorError::Timeout,
        Some(FailureKind::Navigation) => {
            OrchestratorError::Navigation { reason: "navigation failed during script execution".into() }
        }
        Some(FailureKind::Cancelled) => OrchestratorError::Cancelled,
        Some(FailureKind::Driver) | None => {
            OrchestratorError::Driver { reason: "action failed during script execution".into() }
        }
    }
}

/// Run `script` to completion (or failure/stop) against `session`'s Worker.
/// Spawned as its own task per `execute_script` message so the Gateway's
/// read loop stays free to accept pause/resume/stop for the Execution it
/// just started.
pub async fn run_script<D: BrowserDriver + 'static>(
    session: Arc<Session<D>>,
    progress: Arc<ProgressManager>,
    store: Arc<ScriptStore>,
    script: Script,
    supplied_variables: HashMap<String, String>,
    action_deadline: Duration,
    streamer: Option<Arc<ScreenshotStreamer<D>>>,
) {
    let values = resolved_values(&script, &supplied_variables);
    let total_steps = script.actions.len() as u32;

    let handle = match progress.start(session.id, script.id, total_steps, &script.name, &session.fanout) {
        Ok(handle) => handle,
        Err(err) => {
            warn!(?err, script = %script.name, "could not start execution");
            return;
        }
    };

    let mut stamped = script.clone();
    stamped.last_run_at = Some(Utc::now());
    if let Err(err) = store.save(stamped).await {
        warn!(?err, script = %script.name, "failed to stamp last_run_at");
    }

    let missing = missing_variables(&script, &values);
    if !missing.is_empty() {
        let _ = progress.fail(handle, &OrchestratorError::MissingVariable { missing }, &session.fanout);
        return;
    }

    for action in &script.actions {
        handle.wait_if_paused().await;
        if handle.is_stopped() {
            return;
        }

        let resolved_kind = match automaton_variables::resolve_action(&action.kind, &values) {
            Ok(kind) => kind,
            Err(err) => {
                let _ = progress.fail(handle, &err, &session.fanout);
                return;
            }
        };

        let deadline = Instant::now() + action_deadline;
        let result = match session.worker.execute(&resolved_kind, deadline).await {
            Ok(result) => result,
            Err(err) => {
                let _ = progress.fail(handle, &err, &session.fanout);
                return;
            }
        };

        if result.success {
            let current_url = session.worker.current_url().await;
            session.record_if_active(action.instruction.clone(), resolved_kind, &current_url);
        }
        if let Some(streamer) = &streamer {
            streamer.notify_activity();
        }

        let failure_error = (!result.success).then(|| error_for_failure(&result));
        let entry = StepLogEntry { step: action.step, description: action.description.clone(), result };
        if let Err(err) = progress.record_step(&handle, entry, &session.fanout) {
            warn!(?err, step = action.step, "failed to record step");
            return;
        }

        if let Some(failure_error) = failure_error {
            let _ = progress.fail(handle, &failure_error, &session.fanout);
            return;
        }
    }

    if let Err(err) = progress.complete(handle, &session.fanout) {
        warn!(?err, script = %script.name, "failed to mark execution complete");
    } else {
        info!(script = %script.name, "execution completed");
    }
}
