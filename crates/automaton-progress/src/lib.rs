//! Drives a Script through its steps, tracking the Execution state machine
//! and honoring pause/resume/stop control signals. The step-by-step driving loop itself lives with the session
//! orchestration layer; this crate owns the state machine, its invariants,
//! and the bounded history.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use automaton_core_types::{
    ErrorRecord, Execution, ExecutionId, ExecutionStatus, OrchestratorError, ScriptId, SessionId,
    StepLogEntry,
};
use automaton_event_bus::SessionFanout;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Live runtime handle for one in-flight Execution. The session driver polls
/// [`ExecutionHandle::wait_if_paused`] between steps and checks
/// [`ExecutionHandle::is_stopped`] at its checkpoints.
pub struct ExecutionHandle {
    id: ExecutionId,
    state: RwLock<Execution>,
    pause_notify: Notify,
    stop_flag: AtomicBool,
}

impl ExecutionHandle {
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn snapshot(&self) -> Execution {
        self.state.read().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Blocks while the Execution is `PAUSED`; returns immediately otherwise
    /// (including once stopped, so the driver doesn't hang waiting to resume
    /// an Execution that was stopped while paused).
    pub async fn wait_if_paused(&self) {
        loop {
            if self.state.read().status != ExecutionStatus::Paused || self.is_stopped() {
                return;
            }
            self.pause_notify.notified().await;
        }
    }
}

struct SessionSlot {
    running: u32,
}

/// Owns every active and recently terminal Execution across all sessions.
pub struct ProgressManager {
    active: DashMap<ExecutionId, Arc<ExecutionHandle>>,
    running_per_session: DashMap<SessionId, SessionSlot>,
    history: Mutex<VecDeque<Execution>>,
    history_capacity: usize,
    max_concurrent_executions: usize,
}

impl ProgressManager {
    pub fn new(history_capacity: usize, max_concurrent_executions: usize) -> Self {
        Self {
            active: DashMap::new(),
            running_per_session: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            max_concurrent_executions,
        }
    }

    /// Begin a new Execution, enforcing `max_concurrent_executions` per
    /// session and emitting
    /// `execution_started`.
    pub fn start(
        &self,
        session_id: SessionId,
        script_id: ScriptId,
        total_steps: u32,
        script_name: &str,
        fanout: &SessionFanout,
    ) -> Result<Arc<ExecutionHandle>, OrchestratorError> {
        {
            let mut slot = self
                .running_per_session
                .entry(session_id)
                .or_insert(SessionSlot { running: 0 });
            if slot.running >= self.max_concurrent_executions as u32 {
                return Err(OrchestratorError::Busy);
            }
            slot.running += 1;
        }

        let execution = Execution {
            id: ExecutionId::new(),
            script_id,
            session_id,
            total_steps,
            current_step: 0,
            status: ExecutionStatus::Running,
            progress: 0,
            started_at: Utc::now(),
            ended_at: None,
            log: Vec::new(),
            errors: Vec::new(),
            last_successful_step: 0,
        };
        let handle = Arc::new(ExecutionHandle {
            id: execution.id,
            state: RwLock::new(execution),
            pause_notify: Notify::new(),
            stop_flag: AtomicBool::new(false),
        });
        self.active.insert(handle.id, handle.clone());

        fanout.broadcast(automaton_core_types::OutboundEvent::ExecutionStarted {
            execution_id: handle.id,
            total_steps,
            script_name: script_name.to_string(),
        });
        Ok(handle)
    }

    /// Record completion of one step. Retries within a step never reach
    /// here — only the final success/failure for that step index does, so
    /// `current_step` advances exactly once per call.
    pub fn record_step(
        &self,
        handle: &ExecutionHandle,
        entry: StepLogEntry,
        fanout: &SessionFanout,
    ) -> Result<(), OrchestratorError> {
        let snapshot = {
            let mut exec = handle.state.write();
            if exec.status != ExecutionStatus::Running {
                return Err(OrchestratorError::SchemaMismatch {
                    reason: format!("cannot record a step while execution is {:?}", exec.status),
                });
            }
            let expected = exec.current_step + 1;
            if entry.step != expected {
                return Err(OrchestratorError::SchemaMismatch {
                    reason: format!("out-of-order step: expected {expected}, got {}", entry.step),
                });
            }
            exec.current_step = expected;
            if entry.result.success {
                exec.last_successful_step = exec.current_step;
            }
            let progress = (exec.current_step as f64 / exec.total_steps.max(1) as f64 * 100.0).round();
            exec.progress = progress.clamp(0.0, 100.0) as u8;
            exec.log.push(entry.clone());
            exec.clone()
        };

        fanout.broadcast(automaton_core_types::OutboundEvent::ExecutionProgress {
            execution_id: handle.id,
            current_step: snapshot.current_step,
            total_steps: snapshot.total_steps,
            progress: snapshot.progress,
            status: ExecutionStatus::Running,
            step: entry,
        });
        Ok(())
    }

    pub fn pause(&self, handle: &ExecutionHandle, fanout: &SessionFanout) -> Result<(), OrchestratorError> {
        {
            let mut exec = handle.state.write();
            if exec.status != ExecutionStatus::Running {
                return Err(OrchestratorError::SchemaMismatch {
                    reason: "pause is only valid from RUNNING".into(),
                });
            }
            exec.status = ExecutionStatus::Paused;
        }
        fanout.broadcast(automaton_core_types::OutboundEvent::ExecutionPaused { execution_id: handle.id });
        Ok(())
    }

    pub fn resume(&self, handle: &ExecutionHandle, fanout: &SessionFanout) -> Result<(), OrchestratorError> {
        {
            let mut exec = handle.state.write();
            if exec.status != ExecutionStatus::Paused {
                return Err(OrchestratorError::SchemaMismatch {
                    reason: "resume is only valid from PAUSED".into(),
                });
            }
            exec.status = ExecutionStatus::Running;
        }
        handle.pause_notify.notify_waiters();
        fanout.broadcast(automaton_core_types::OutboundEvent::ExecutionResumed { execution_id: handle.id });
        Ok(())
    }

    /// `complete` is only valid once every step has reported in.
    pub fn complete(&self, handle: Arc<ExecutionHandle>, fanout: &SessionFanout) -> Result<(), OrchestratorError> {
        let duration_ms = {
            let mut exec = handle.state.write();
            if exec.status != ExecutionStatus::Running || exec.current_step != exec.total_steps {
                return Err(OrchestratorError::SchemaMismatch {
                    reason: "complete requires RUNNING with current_step == total_steps".into(),
                });
            }
            exec.status = ExecutionStatus::Completed;
            exec.ended_at = Some(Utc::now());
            duration_of(&exec)
        };
        self.retire(handle.clone(), fanout, |fanout| {
            fanout.broadcast(automaton_core_types::OutboundEvent::ExecutionCompleted {
                execution_id: handle.id,
                duration_ms,
            });
        });
        Ok(())
    }

    pub fn fail(
        &self,
        handle: Arc<ExecutionHandle>,
        error: &OrchestratorError,
        fanout: &SessionFanout,
    ) -> Result<(), OrchestratorError> {
        let (duration_ms, last_successful_step) = {
            let mut exec = handle.state.write();
            if exec.status.is_terminal() {
                return Err(OrchestratorError::SchemaMismatch { reason: "already terminal".into() });
            }
            exec.status = ExecutionStatus::Failed;
            exec.ended_at = Some(Utc::now());
            exec.errors.push(ErrorRecord::from(error));
            (duration_of(&exec), exec.last_successful_step)
        };
        let record = ErrorRecord::from(error);
        self.retire(handle.clone(), fanout, |fanout| {
            fanout.broadcast(automaton_core_types::OutboundEvent::ExecutionFailed {
                execution_id: handle.id,
                duration_ms,
                error: record,
                last_successful_step,
            });
        });
        Ok(())
    }

    /// `stop` is valid from RUNNING or PAUSED; it sets the cancellation flag
    /// the driver observes at its next checkpoint.
    pub fn stop(&self, handle: Arc<ExecutionHandle>, fanout: &SessionFanout) -> Result<(), OrchestratorError> {
        handle.stop_flag.store(true, Ordering::SeqCst);
        handle.pause_notify.notify_waiters();

        let (duration_ms, last_successful_step) = {
            let mut exec = handle.state.write();
            if exec.status.is_terminal() {
                return Err(OrchestratorError::SchemaMismatch { reason: "already terminal".into() });
            }
            exec.status = ExecutionStatus::Stopped;
            exec.ended_at = Some(Utc::now());
            (duration_of(&exec), exec.last_successful_step)
        };
        self.retire(handle.clone(), fanout, |fanout| {
            fanout.broadcast(automaton_core_types::OutboundEvent::ExecutionStopped {
                execution_id: handle.id,
                duration_ms,
                last_successful_step,
            });
        });
        Ok(())
    }

    fn retire(&self, handle: Arc<ExecutionHandle>, fanout: &SessionFanout, emit: impl FnOnce(&SessionFanout)) {
        self.active.remove(&handle.id);
        let snapshot = handle.snapshot();
        if let Some(mut slot) = self.running_per_session.get_mut(&snapshot.session_id) {
            slot.running = slot.running.saturating_sub(1);
        }

        let mut history = self.history.lock();
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(snapshot);

        emit(fanout);
        debug!(execution_id = %handle.id.0, "execution retired to history");
    }

    pub fn get_active(&self, id: ExecutionId) -> Option<Arc<ExecutionHandle>> {
        self.active.get(&id).map(|h| h.clone())
    }

    pub fn get_history(&self, id: ExecutionId) -> Option<Execution> {
        self.history.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Tear down every active Execution for a session as `STOPPED` (used by
    /// session idle teardown).
    pub fn stop_all_for_session(&self, session_id: SessionId, fanout: &SessionFanout) {
        let ids: Vec<ExecutionId> = self
            .active
            .iter()
            .filter(|entry| entry.value().snapshot().session_id == session_id)
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            if let Some(handle) = self.get_active(id) {
                if let Err(err) = self.stop(handle, fanout) {
                    warn!(?err, "failed to stop execution during session teardown");
                }
            }
        }
    }
}

fn duration_of(exec: &Execution) -> u64 {
    let end = exec.ended_at.unwrap_or_else(Utc::now);
    (end - exec.started_at).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use automaton_core_types::{ActionResult, FailureKind};

    fn step(index: u32, success: bool) -> StepLogEntry {
        StepLogEntry {
            step: index,
            description: "step".into(),
            result: if success {
                ActionResult::success(None, None, 10)
            } else {
                ActionResult::failure(FailureKind::TargetNotFound, 10, vec![])
            },
        }
    }

    #[test]
    fn progress_is_monotonic_and_completes_at_100() {
        let manager = ProgressManager::new(10, 5);
        let fanout = SessionFanout::new();
        fanout.attach(8);
        let handle = manager
            .start(SessionId::new(), ScriptId::new(), 2, "demo", &fanout)
            .unwrap();

        manager.record_step(&handle, step(1, true), &fanout).unwrap();
        assert_eq!(handle.snapshot().progress, 50);
        manager.record_step(&handle, step(2, true), &fanout).unwrap();
        assert_eq!(handle.snapshot().progress, 100);

        manager.complete(handle.clone(), &fanout).unwrap();
        assert_eq!(handle.snapshot().status, ExecutionStatus::Completed);
    }

    #[test]
    fn out_of_order_step_is_rejected() {
        let manager = ProgressManager::new(10, 5);
        let fanout = SessionFanout::new();
        fanout.attach(8);
        let handle = manager
            .start(SessionId::new(), ScriptId::new(), 3, "demo", &fanout)
            .unwrap();
        let err = manager.record_step(&handle, step(2, true), &fanout);
        assert!(err.is_err());
    }

    #[test]
    fn exceeding_max_concurrent_executions_rejects_with_busy() {
        let manager = ProgressManager::new(10, 1);
        let fanout = SessionFanout::new();
        fanout.attach(8);
        let session = SessionId::new();
        manager.start(session, ScriptId::new(), 1, "a", &fanout).unwrap();
        let err = manager.start(session, ScriptId::new(), 1, "b", &fanout);
        assert!(matches!(err, Err(OrchestratorError::Busy)));
    }

    #[test]
    fn stop_moves_execution_to_history_and_frees_concurrency_slot() {
        let manager = ProgressManager::new(10, 1);
        let fanout = SessionFanout::new();
        fanout.attach(8);
        let session = SessionId::new();
        let handle = manager.start(session, ScriptId::new(), 2, "a", &fanout).unwrap();
        manager.stop(handle.clone(), &fanout).unwrap();
        assert!(manager.get_active(handle.id()).is_none());
        assert!(manager.get_history(handle.id()).is_some());
        manager.start(session, ScriptId::new(), 1, "b", &fanout).unwrap();
    }
}
