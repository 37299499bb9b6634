//! Process entrypoint: parse configuration, wire every service, bind, and
//! serve. Kept thin — the bootstrap has exactly one path since this crate
//! exposes a single subcommand rather than a multi-command CLI.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use automaton_browser_worker::SimulatedDriver;
use automaton_gateway::config::{AppConfig, CliArgs};
use automaton_gateway::server::state::AppState;
use automaton_gateway::{auth, metrics, server};
use automaton_interpreter::Interpreter;
use automaton_progress::ProgressManager;
use automaton_script_store::ScriptStore;
use automaton_session::SessionManager;
use clap::Parser;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(15);
const RATE_LIMIT_GC_INTERVAL: Duration = Duration::from_secs(60);
const RATE_LIMIT_BUCKET_TTL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();
    init_logging(&cli.log_level, cli.json_logs);

    let config = match AppConfig::resolve(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!(?err, "invalid configuration");
            return ExitCode::from(1);
        }
    };
    let config = Arc::new(config);

    metrics::register_metrics();

    let scripts = match ScriptStore::open(&config.storage_root).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(?err, "failed to initialize script store");
            return ExitCode::from(3);
        }
    };

    let progress = Arc::new(ProgressManager::new(config.history_capacity, config.max_concurrent_executions));
    let sessions = Arc::new(SessionManager::new(progress.clone(), config.idle_timeout, || {
        SimulatedDriver::new("about:blank")
    }));

    let interpreter = Arc::new(build_interpreter(&config));
    let auth = Arc::new(auth::AuthPolicy::new(config.auth_tokens.clone()));
    let rate_limiter = Arc::new(server::rate_limit::RateLimiter::new(server::rate_limit::RateLimitConfig::from_env()));

    let state = AppState {
        sessions: sessions.clone(),
        progress,
        scripts,
        interpreter,
        auth,
        rate_limiter: rate_limiter.clone(),
        config: config.clone(),
        streamers: Arc::new(DashMap::new()),
    };

    spawn_idle_sweep(sessions);
    spawn_rate_limit_gc(rate_limiter);

    let app = server::router(state);
    let listener = match TcpListener::bind(config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(?err, addr = %config.listen_addr, "failed to bind listen address");
            return ExitCode::from(2);
        }
    };
    info!(addr = %config.listen_addr, "automaton gateway listening");

    let serve_result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;
    if let Err(err) = serve_result {
        error!(?err, "gateway server exited unexpectedly");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_interpreter(config: &AppConfig) -> Interpreter {
    match &config.llm_planner_endpoint {
        Some(endpoint) => {
            let planner = automaton_interpreter::HttpLlmPlanner::new(endpoint.clone(), config.llm_planner_key.clone());
            Interpreter::new(Arc::new(planner))
        }
        None => Interpreter::with_default_planner(),
    }
}

fn spawn_idle_sweep<D>(sessions: Arc<SessionManager<D>>)
where
    D: automaton_browser_worker::BrowserDriver + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(IDLE_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            sessions.sweep_idle().await;
        }
    });
}

fn spawn_rate_limit_gc(rate_limiter: Arc<server::rate_limit::RateLimiter>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_LIMIT_GC_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = rate_limiter.prune_idle(RATE_LIMIT_BUCKET_TTL);
            if removed > 0 {
                tracing::debug!(removed, "pruned stale rate limit buckets");
            }
        }
    });
}
