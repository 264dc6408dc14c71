//! Configuration module for pulsewatch.
//!
//! Server settings load from environment variables with sensible defaults;
//! the target set loads from a JSON targets file. Everything is validated
//! here — a configuration problem is fatal at startup and can never
//! surface at runtime.

use crate::db::Target;

use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid target definition: {0}")]
    InvalidTarget(String),
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the API server (default: 8080).
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pulsewatch.db").
    pub db_path: String,
    /// Path to the JSON targets file (default: "targets.json").
    pub targets_path: String,
    /// Default check interval for targets without an override.
    pub default_interval: Duration,
    /// Default probe timeout for targets without an override.
    pub default_timeout: Duration,
    /// Rolling window size for status statistics.
    pub status_window: usize,
    /// How long in-flight probes may run after shutdown begins.
    pub shutdown_grace: Duration,
    /// The monitored targets, fixed for the lifetime of the run.
    pub targets: Vec<Target>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pulsewatch.db".to_string(),
            targets_path: "targets.json".to_string(),
            default_interval: Duration::from_secs(60),
            default_timeout: Duration::from_secs(10),
            status_window: 20,
            shutdown_grace: Duration::from_secs(5),
            targets: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and the targets file.
    ///
    /// Environment variables:
    /// - `PULSEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PULSEWATCH_DB_PATH`: database file path (default: "pulsewatch.db")
    /// - `PULSEWATCH_TARGETS_PATH`: targets file path (default: "targets.json")
    /// - `PULSEWATCH_CHECK_INTERVAL`: default interval seconds (default: 60)
    /// - `PULSEWATCH_HTTP_TIMEOUT`: default timeout seconds (default: 10)
    /// - `PULSEWATCH_STATUS_WINDOW`: rolling window size (default: 20)
    /// - `PULSEWATCH_SHUTDOWN_GRACE`: shutdown grace seconds (default: 5)
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(port) = env_parse("PULSEWATCH_HTTP_PORT")? {
            cfg.http_port = port;
        }
        if let Ok(db_path) = env::var("PULSEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Ok(targets_path) = env::var("PULSEWATCH_TARGETS_PATH") {
            cfg.targets_path = targets_path;
        }
        if let Some(secs) = env_duration_secs("PULSEWATCH_CHECK_INTERVAL")? {
            cfg.default_interval = secs;
        }
        if let Some(secs) = env_duration_secs("PULSEWATCH_HTTP_TIMEOUT")? {
            cfg.default_timeout = secs;
        }
        if let Some(window) = env_parse("PULSEWATCH_STATUS_WINDOW")? {
            cfg.status_window = window;
        }
        if let Some(secs) = env_parse::<u64>("PULSEWATCH_SHUTDOWN_GRACE")? {
            cfg.shutdown_grace = Duration::from_secs(secs);
        }

        cfg.targets = load_targets(&cfg.targets_path, cfg.default_interval, cfg.default_timeout)?;
        Ok(cfg)
    }
}

fn env_parse<T: FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    let Ok(value) = env::var(var) else {
        return Ok(None);
    };
    match value.parse() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        }),
    }
}

/// Parse a whole-seconds env var into a non-zero duration.
fn env_duration_secs(var: &str) -> Result<Option<Duration>, ConfigError> {
    match env_parse::<u64>(var)? {
        None => Ok(None),
        Some(0) => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: "0".to_string(),
        }),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
    }
}

/// One entry of the targets file.
#[derive(Debug, Deserialize)]
struct TargetSpec {
    id: String,
    url: String,
    #[serde(default)]
    interval_secs: Option<u64>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Read and validate the targets file.
fn load_targets(
    path: &str,
    default_interval: Duration,
    default_timeout: Duration,
) -> Result<Vec<Target>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;

    let specs: Vec<TargetSpec> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;

    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(specs.len());

    for spec in specs {
        if spec.id.trim().is_empty() {
            return Err(ConfigError::InvalidTarget("empty target id".to_string()));
        }
        if !seen.insert(spec.id.clone()) {
            return Err(ConfigError::InvalidTarget(format!(
                "duplicate target id: {}",
                spec.id
            )));
        }

        let url = reqwest::Url::parse(&spec.url).map_err(|e| {
            ConfigError::InvalidTarget(format!("{}: bad url {:?}: {}", spec.id, spec.url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidTarget(format!(
                "{}: unsupported scheme {:?}",
                spec.id,
                url.scheme()
            )));
        }

        if spec.interval_secs == Some(0) {
            return Err(ConfigError::InvalidTarget(format!(
                "{}: interval must be positive",
                spec.id
            )));
        }
        if spec.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidTarget(format!(
                "{}: timeout must be positive",
                spec.id
            )));
        }

        targets.push(Target {
            id: spec.id,
            url: spec.url,
            interval: spec
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(default_interval),
            timeout: spec
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
        });
    }

    Ok(targets)
}
