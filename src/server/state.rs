//! Shared application state handed to every axum handler, grounded on the
//! teacher's `ServeState` (`src/server/state.rs`): a small `Clone` struct of
//! `Arc`'d services built once at startup and passed through
//! `Router::with_state`.

use std::sync::Arc;

use automaton_browser_worker::BrowserDriver;
use automaton_core_types::SessionId;
use automaton_interpreter::Interpreter;
use automaton_progress::ProgressManager;
use automaton_screenshot::ScreenshotStreamer;
use automaton_script_store::ScriptStore;
use automaton_session::SessionManager;
use dashmap::DashMap;

use crate::auth::AuthPolicy;
use crate::config::AppConfig;
use crate::server::rate_limit::RateLimiter;

/// Bundles every long-lived service the gateway's WebSocket handler needs.
/// Generic over the concrete [`BrowserDriver`] so one process runs with one
/// driver implementation throughout, matching [`SessionManager`]'s own
/// generic parameter.
pub struct AppState<D: BrowserDriver + 'static> {
    pub sessions: Arc<SessionManager<D>>,
    pub progress: Arc<ProgressManager>,
    pub scripts: Arc<ScriptStore>,
    pub interpreter: Arc<Interpreter>,
    pub auth: Arc<AuthPolicy>,
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Arc<AppConfig>,
    /// One adaptive screenshot producer per live session, created lazily on
    /// first attach and torn down when the session is. Kept alongside
    /// [`SessionManager`] rather than inside `Session` itself so the
    /// screenshot crate doesn't need to depend back on the session crate.
    pub streamers: Arc<DashMap<SessionId, Arc<ScreenshotStreamer<D>>>>,
}

impl<D: BrowserDriver + 'static> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            progress: self.progress.clone(),
            scripts: self.scripts.clone(),
            interpreter: self.interpreter.clone(),
            auth: self.auth.clone(),
            rate_limiter: self.rate_limiter.clone(),
            config: self.config.clone(),
            streamers: self.streamers.clone(),
        }
    }
}

impl<D: BrowserDriver + 'static> AppState<D> {
    /// Fetch or create this session's screenshot streamer and ensure its
    /// producer task is running.
    pub fn streamer_for(
        &self,
        session: &Arc<automaton_session::Session<D>>,
    ) -> Arc<ScreenshotStreamer<D>> {
        if let Some(existing) = self.streamers.get(&session.id) {
            return existing.clone();
        }
        let streamer =
            ScreenshotStreamer::new(session.worker.clone(), session.fanout.clone(), self.config.base_screenshot_rate_hz);
        self.streamers.insert(session.id, streamer.clone());
        tokio::spawn(streamer.clone().run());
        streamer
    }
}
