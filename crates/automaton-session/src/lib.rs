//! Owns the lifecycle of sessions and their per-session singletons: a
//! `DashMap` keyed registry where each entry owns exactly one [`Worker`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use automaton_browser_worker::{BrowserDriver, Worker};
use automaton_core_types::{ActionKind, OrchestratorError, Script, SessionId};
use automaton_event_bus::{ClientOutbox, SessionFanout};
use automaton_progress::ProgressManager;
use automaton_recorder::Recorder;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

struct RecordingSlot {
    recorder: Recorder,
    name: String,
}

/// Per-session singletons: exactly one [`Worker`], its outbound fan-out, one [`Recorder`], and activity bookkeeping
/// for idle teardown.
pub struct Session<D: BrowserDriver> {
    pub id: SessionId,
    pub worker: Arc<Worker<D>>,
    pub fanout: Arc<SessionFanout>,
    recording: Mutex<Option<RecordingSlot>>,
    last_activity: Mutex<DateTime<Utc>>,
}

impl<D: BrowserDriver> Session<D> {
    pub fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    fn idle_for(&self) -> chrono::Duration {
        Utc::now() - *self.last_activity.lock()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.lock().is_some()
    }

    /// Open the session's recording slot. Only one recording
    /// may be open at a time per session.
    pub fn start_recording(&self, name: impl Into<String>) -> Result<(), OrchestratorError> {
        let mut slot = self.recording.lock();
        if slot.is_some() {
            return Err(OrchestratorError::SchemaMismatch {
                reason: "a recording is already in progress for this session".into(),
            });
        }
        *slot = Some(RecordingSlot { recorder: Recorder::new(), name: name.into() });
        Ok(())
    }

    /// Append a successfully executed action to the open recording, if any
    ///. A no-op when the session isn't
    /// recording, so callers may invoke this unconditionally after every
    /// successful Worker action.
    pub fn record_if_active(&self, instruction: Option<String>, kind: ActionKind, current_url: &str) {
        if let Some(slot) = self.recording.lock().as_mut() {
            slot.recorder.record_success(instruction, kind, current_url);
        }
    }

    /// Close the recording slot, producing a [`Script`] with its inferred
    /// variable schema.
    pub fn stop_recording(&self) -> Result<Script, OrchestratorError> {
        let slot = self
            .recording
            .lock()
            .take()
            .ok_or_else(|| OrchestratorError::SchemaMismatch { reason: "no recording in progress".into() })?;
        slot.recorder.finish(slot.name)
    }
}

/// Registry of all live sessions for one running process. Generic over the
/// concrete [`BrowserDriver`] so a single deployment uses one driver
/// implementation consistently; each session gets its own driver instance
/// via `driver_factory`.
pub struct SessionManager<D: BrowserDriver> {
    sessions: DashMap<SessionId, Arc<Session<D>>>,
    progress: Arc<ProgressManager>,
    driver_factory: Arc<dyn Fn() -> D + Send + Sync>,
    idle_timeout: chrono::Duration,
    next_client_id: AtomicU64,
}

impl<D: BrowserDriver + 'static> SessionManager<D> {
    pub fn new(
        progress: Arc<ProgressManager>,
        idle_timeout: std::time::Duration,
        driver_factory: impl Fn() -> D + Send + Sync + 'static,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            progress,
            driver_factory: Arc::new(driver_factory),
            idle_timeout: chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::minutes(5)),
            next_client_id: AtomicU64::new(0),
        }
    }

    /// Attach a client, creating a session if `session_id` is `None` or
    /// unknown. Returns the bound session plus a fresh client outbox.
    pub async fn attach(
        &self,
        session_id: Option<SessionId>,
    ) -> Result<(Arc<Session<D>>, u64, ClientOutbox), OrchestratorError> {
        let session = match session_id.and_then(|id| self.sessions.get(&id).map(|s| s.clone())) {
            Some(session) => session,
            None => self.create_session().await?,
        };

        let (client_id, outbox) = session.fanout.attach(0);
        session.touch();
        info!(session_id = %session.id.0, client_id, "client attached");
        Ok((session, client_id, outbox))
    }

    async fn create_session(&self) -> Result<Arc<Session<D>>, OrchestratorError> {
        let driver = Arc::new((self.driver_factory)());
        let worker = Arc::new(Worker::new(driver));
        worker.open().await?;

        let session = Arc::new(Session {
            id: SessionId::new(),
            worker,
            fanout: Arc::new(SessionFanout::new()),
            recording: Mutex::new(None),
            last_activity: Mutex::new(Utc::now()),
        });
        self.sessions.insert(session.id, session.clone());
        info!(session_id = %session.id.0, "session created");
        Ok(session)
    }

    pub fn detach(&self, session_id: SessionId, client_id: u64) {
        if let Some(session) = self.sessions.get(&session_id) {
            session.fanout.detach(client_id);
            session.touch();
        }
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<Session<D>>> {
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    /// Tear down every session idle past `idle_timeout` with zero attached
    /// clients: closes the Worker, stops any active Execution as `STOPPED`,
    /// and drops the session (its history stays in the Progress Manager).
    pub async fn sweep_idle(&self) {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.fanout.client_count() == 0 && session.idle_for() >= self.idle_timeout
            })
            .map(|entry| *entry.key())
            .collect();

        for id in expired {
            if let Some((_, session)) = self.sessions.remove(&id) {
                self.progress.stop_all_for_session(id, &session.fanout);
                if let Err(err) = session.worker.close().await {
                    debug!(?err, session_id = %id.0, "error closing worker during idle teardown");
                }
                info!(session_id = %id.0, "session torn down after idle timeout");
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automaton_browser_worker::SimulatedDriver;

    fn manager(idle: std::time::Duration) -> SessionManager<SimulatedDriver> {
        SessionManager::new(
            Arc::new(ProgressManager::new(10, 5)),
            idle,
            || SimulatedDriver::new("https://example.test"),
        )
    }

    #[tokio::test]
    async fn attach_without_session_id_creates_a_new_session() {
        let manager = manager(std::time::Duration::from_secs(300));
        let (session, _client_id, _outbox) = manager.attach(None).await.unwrap();
        assert_eq!(manager.session_count(), 1);
        assert_eq!(session.fanout.client_count(), 1);
    }

    #[tokio::test]
    async fn second_attach_with_known_id_joins_existing_session() {
        let manager = manager(std::time::Duration::from_secs(300));
        let (session, _id1, _outbox1) = manager.attach(None).await.unwrap();
        let (rejoined, _id2, _outbox2) = manager.attach(Some(session.id)).await.unwrap();
        assert_eq!(manager.session_count(), 1);
        assert_eq!(rejoined.fanout.client_count(), 2);
    }

    #[tokio::test]
    async fn idle_session_with_no_clients_is_torn_down() {
        let manager = manager(std::time::Duration::from_millis(0));
        let (session, client_id, _outbox) = manager.attach(None).await.unwrap();
        manager.detach(session.id, client_id);
        manager.sweep_idle().await;
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn session_with_attached_client_survives_sweep() {
        let manager = manager(std::time::Duration::from_millis(0));
        let (session, _client_id, _outbox) = manager.attach(None).await.unwrap();
        manager.sweep_idle().await;
        assert_eq!(manager.session_count(), 1);
        let _ = session;
    }

    #[tokio::test]
    async fn recording_lifecycle_accumulates_then_finishes_a_script() {
        use automaton_core_types::{Target, TargetCandidate};

        let manager = manager(std::time::Duration::from_secs(300));
        let (session, _client_id, _outbox) = manager.attach(None).await.unwrap();

        assert!(!session.is_recording());
        session.start_recording("login flow").unwrap();
        assert!(session.is_recording());
        session.record_if_active(
            Some("click submit".into()),
            ActionKind::Click {
                target: Target::new(TargetCandidate::Selector { selector: "#submit".into() }),
            },
            "https://example.test/login",
        );

        let script = session.stop_recording().unwrap();
        assert!(!session.is_recording());
        assert_eq!(script.name, "login flow");
        assert_eq!(script.initial_url, "https://example.test/login");
        assert_eq!(script.actions.len(), 2);
    }

    #[tokio::test]
    async fn starting_a_second_recording_while_one_is_open_fails() {
        let manager = manager(std::time::Duration::from_secs(300));
        let (session, _client_id, _outbox) = manager.attach(None).await.unwrap();
        session.start_recording("a").unwrap();
        assert!(session.start_recording("b").is_err());
    }
}
