//! Logging configuration from the environment and tracing subscriber setup.
//!
//! Every event carries `component` and `event` fields so JSON output can be
//! filtered without parsing messages.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LEVEL_VAR: &str = "JOBDASH_LOG_LEVEL";
const FORMAT_VAR: &str = "JOBDASH_LOG_FORMAT";
const TARGET_VAR: &str = "JOBDASH_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `JOBDASH_LOG_LEVEL`, `JOBDASH_LOG_FORMAT` and `JOBDASH_LOG_TARGET`.
/// Unset or unparseable values keep the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();

    let level = env::var(LEVEL_VAR)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|level| !level.is_empty())
        .unwrap_or(defaults.level);
    let format = env::var(FORMAT_VAR)
        .ok()
        .and_then(|raw| LogFormat::parse(&raw))
        .unwrap_or(defaults.format);
    let include_target = env::var(TARGET_VAR)
        .ok()
        .and_then(|raw| parse_bool(&raw))
        .unwrap_or(defaults.include_target);

    LoggingConfig {
        level,
        format,
        include_target,
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "dashboard_server",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "dashboard_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/dashboard"
    );
}

/// `base_url` is absent for the in-memory demo source.
pub fn log_source_selected(source: &str, base_url: Option<&str>, gated_tick_ms: u64) {
    match base_url {
        Some(base_url) => info!(
            component = "dashboard_server",
            event = "source.selected",
            source,
            base_url,
            gated_tick_ms
        ),
        None => info!(
            component = "dashboard_server",
            event = "source.selected",
            source,
            gated_tick_ms
        ),
    }
}

pub fn log_app_stop(reason: &str) {
    info!(component = "dashboard_server", event = "app.stop", reason);
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
