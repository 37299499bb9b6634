//! Prometheus registry and instrumentation points for the gateway: a
//! process-global `Registry` behind a `Lazy`, one `OnceCell` per metric
//! family, registered once. No `/metrics` HTTP endpoint is exposed here, but
//! the registry and instrumentation calls are carried regardless so a
//! scrape endpoint can be bolted on without touching call sites.

use once_cell::sync::{Lazy, OnceCell};
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

static ACTIVE_SESSIONS: OnceCell<IntGauge> = OnceCell::new();
static ACTIVE_EXECUTIONS: OnceCell<IntGauge> = OnceCell::new();
static INTERPRETER_TIER_HITS: OnceCell<IntCounterVec> = OnceCell::new();
static WORKER_RETRIES: OnceCell<IntCounterVec> = OnceCell::new();
static EXECUTIONS_TERMINAL: OnceCell<IntCounterVec> = OnceCell::new();

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();

        let sessions = IntGauge::new("automaton_active_sessions", "Currently live sessions")
            .expect("create active sessions gauge");
        if let Err(err) = registry.register(Box::new(sessions.clone())) {
            error!(?err, "failed to register active sessions gauge");
        }
        let _ = ACTIVE_SESSIONS.set(sessions);

        let executions = IntGauge::new("automaton_active_executions", "Currently RUNNING or PAUSED executions")
            .expect("create active executions gauge");
        if let Err(err) = registry.register(Box::new(executions.clone())) {
            error!(?err, "failed to register active executions gauge");
        }
        let _ = ACTIVE_EXECUTIONS.set(executions);

        let tier_hits = IntCounterVec::new(
            Opts::new("automaton_interpreter_tier_hits_total", "Instruction resolutions by interpreter tier"),
            &["tier"],
        )
        .expect("create interpreter tier hits counter");
        if let Err(err) = registry.register(Box::new(tier_hits.clone())) {
            error!(?err, "failed to register interpreter tier hits counter");
        }
        let _ = INTERPRETER_TIER_HITS.set(tier_hits);

        let retries = IntCounterVec::new(
            Opts::new("automaton_worker_retries_total", "Worker action retries by failure kind"),
            &["failure_kind"],
        )
        .expect("create worker retries counter");
        if let Err(err) = registry.register(Box::new(retries.clone())) {
            error!(?err, "failed to register worker retries counter");
        }
        let _ = WORKER_RETRIES.set(retries);

        let terminal = IntCounterVec::new(
            Opts::new("automaton_executions_terminal_total", "Executions reaching a terminal status"),
            &["status"],
        )
        .expect("create executions terminal counter");
        if let Err(err) = registry.register(Box::new(terminal.clone())) {
            error!(?err, "failed to register executions terminal counter");
        }
        let _ = EXECUTIONS_TERMINAL.set(terminal);
    });
}

pub fn set_active_sessions(count: i64) {
    if let Some(gauge) = ACTIVE_SESSIONS.get() {
        gauge.set(count);
    }
}

pub fn set_active_executions(count: i64) {
    if let Some(gauge) = ACTIVE_EXECUTIONS.get() {
        gauge.set(count);
    }
}

pub fn record_interpreter_tier_hit(tier: &str) {
    if let Some(counter) = INTERPRETER_TIER_HITS.get() {
        counter.with_label_values(&[tier]).inc();
    }
}

pub fn record_worker_retry(failure_kind: &str) {
    if let Some(counter) = WORKER_RETRIES.get() {
        counter.with_label_values(&[failure_kind]).inc();
    }
}

pub fn record_execution_terminal(status: &str) {
    if let Some(counter) = EXECUTIONS_TERMINAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}
