//! CLI surface and runtime configuration, using the `config` crate instead
//! of a bespoke YAML reader so CLI flags, an optional config file, and
//! `AUTOMATON_*` environment variables compose in one place.

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

const DEFAULT_LISTEN: &str = "0.0.0.0:7079";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 5;
const DEFAULT_BASE_SCREENSHOT_RATE_HZ: f64 = 2.0;
const DEFAULT_HISTORY_CAPACITY: usize = 200;
const DEFAULT_ACTION_DEADLINE_MS: u64 = 30_000;
const DEFAULT_STORAGE_ROOT: &str = "./data";

/// Command-line surface. Every
/// field defaults to `None` here rather than carrying a clap default, so a
/// value left unset on the command line doesn't silently shadow the same
/// key set in a config file; [`AppConfig::resolve`] applies the precedence
/// CLI > file > hardcoded default explicitly.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Session-scoped browser automation gateway", long_about = None)]
pub struct CliArgs {
    /// Listen address, e.g. 0.0.0.0:7079
    #[arg(long)]
    pub listen: Option<String>,

    /// Optional config file (YAML/JSON/TOML), layered under CLI args
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Seconds of zero attached clients before a session is torn down
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Max concurrently RUNNING executions per session
    #[arg(long)]
    pub max_concurrent_executions: Option<usize>,

    /// Base screenshot rate while idle, in Hz
    #[arg(long)]
    pub base_screenshot_rate_hz: Option<f64>,

    /// Run the browser driver headless (default: true)
    #[arg(long)]
    pub headless: Option<bool>,

    /// External LLM planner endpoint (interpreter tier 3); unset disables tier 3
    #[arg(long)]
    pub llm_planner_endpoint: Option<String>,

    /// API key for the LLM planner endpoint
    #[arg(long)]
    pub llm_planner_key: Option<String>,

    /// Root directory for persisted scripts
    #[arg(long)]
    pub storage_root: Option<PathBuf>,

    /// Bounded terminal-execution history capacity
    #[arg(long)]
    pub history_capacity: Option<usize>,

    /// Bearer token accepted by the gateway (repeat for multiple); none means no auth
    #[arg(long = "auth-token", value_name = "TOKEN")]
    pub auth_tokens: Vec<String>,

    /// Per-action deadline, in milliseconds
    #[arg(long)]
    pub action_deadline_ms: Option<u64>,

    /// Log level (trace/debug/info/warn/error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON instead of human-readable text
    #[arg(long)]
    pub json_logs: bool,

    /// Metrics registry is always active; this only gates the periodic
    /// `info!`-level summary line (no `/metrics` HTTP endpoint is exposed).
    #[arg(long)]
    pub quiet_metrics: bool,
}

/// File-sourced overlay, deserialized by the `config` crate. Every field is
/// optional; absent keys fall through to the CLI value or hardcoded default.
#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct ConfigFile {
    listen: Option<String>,
    idle_timeout_secs: Option<u64>,
    max_concurrent_executions: Option<usize>,
    base_screenshot_rate_hz: Option<f64>,
    headless: Option<bool>,
    llm_planner_endpoint: Option<String>,
    llm_planner_key: Option<String>,
    storage_root: Option<PathBuf>,
    history_capacity: Option<usize>,
    auth_tokens: Vec<String>,
    action_deadline_ms: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen address '{0}': {1}")]
    InvalidListenAddr(String, AddrParseError),
    #[error("failed to load config file: {0}")]
    File(#[from] config::ConfigError),
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub idle_timeout: Duration,
    pub max_concurrent_executions: usize,
    pub base_screenshot_rate_hz: f64,
    pub headless: bool,
    pub llm_planner_endpoint: Option<String>,
    pub llm_planner_key: Option<String>,
    pub storage_root: PathBuf,
    pub history_capacity: usize,
    pub auth_tokens: Vec<String>,
    pub action_deadline: Duration,
}

impl AppConfig {
    /// Merge CLI args with an optional config file and `AUTOMATON_*`
    /// environment variables (`config` crate, precedence: CLI > env > file >
    /// default), then parse into concrete types. Any failure here is a
    /// configuration error.
    pub fn resolve(cli: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("AUTOMATON"));
        let layered = builder.build()?;
        let file: ConfigFile = layered.try_deserialize().unwrap_or_default();

        let listen = cli
            .listen
            .clone()
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen_addr = listen
            .parse()
            .map_err(|e| ConfigError::InvalidListenAddr(listen.clone(), e))?;

        let mut auth_tokens = cli.auth_tokens.clone();
        if auth_tokens.is_empty() {
            auth_tokens = file.auth_tokens;
        }

        Ok(Self {
            listen_addr,
            idle_timeout: Duration::from_secs(
                cli.idle_timeout_secs
                    .or(file.idle_timeout_secs)
                    .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ),
            max_concurrent_executions: cli
                .max_concurrent_executions
                .or(file.max_concurrent_executions)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_EXECUTIONS),
            base_screenshot_rate_hz: cli
                .base_screenshot_rate_hz
                .or(file.base_screenshot_rate_hz)
                .unwrap_or(DEFAULT_BASE_SCREENSHOT_RATE_HZ),
            headless: cli.headless.or(file.headless).unwrap_or(true),
            llm_planner_endpoint: cli.llm_planner_endpoint.clone().or(file.llm_planner_endpoint),
            llm_planner_key: cli.llm_planner_key.clone().or(file.llm_planner_key),
            storage_root: cli
                .storage_root
                .clone()
                .or(file.storage_root)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT)),
            history_capacity: cli
                .history_capacity
                .or(file.history_capacity)
                .unwrap_or(DEFAULT_HISTORY_CAPACITY),
            auth_tokens,
            action_deadline: Duration::from_millis(
                cli.action_deadline_ms
                    .or(file.action_deadline_ms)
                    .unwrap_or(DEFAULT_ACTION_DEADLINE_MS),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cli = CliArgs::default();
        let cfg = AppConfig::resolve(&cli).unwrap();
        assert_eq!(cfg.listen_addr, DEFAULT_LISTEN.parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.max_concurrent_executions, DEFAULT_MAX_CONCURRENT_EXECUTIONS);
        assert!(cfg.headless);
    }

    #[test]
    fn cli_overrides_defaults() {
        let cli = CliArgs {
            listen: Some("127.0.0.1:9000".into()),
            max_concurrent_executions: Some(9),
            ..CliArgs::default()
        };
        let cfg = AppConfig::resolve(&cli).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.max_concurrent_executions, 9);
    }

    #[test]
    fn invalid_listen_address_is_a_configuration_error() {
        let cli = CliArgs { listen: Some("not-an-address".into()), ..CliArgs::default() };
        assert!(matches!(AppConfig::resolve(&cli), Err(ConfigError::InvalidListenAddr(..))));
    }
}
