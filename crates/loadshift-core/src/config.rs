//! loadshift.toml configuration parser.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadshiftConfig {
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub primary: PrimaryConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
}

/// Scaling policy, fixed for the lifetime of a supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Rate above which the worker takes over.
    pub load_threshold: f64,
    pub poll_interval_ms: u64,
    /// Failed load queries in a row before the supervisor gives up.
    pub max_consecutive_errors: u32,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            load_threshold: 20.0,
            poll_interval_ms: 10_000,
            max_consecutive_errors: 3,
        }
    }
}

impl ScalingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject a policy the poll loop cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.load_threshold.is_finite() {
            return Err(ConfigError::invalid(
                "scaling.load_threshold",
                "must be a finite number",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "scaling.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.max_consecutive_errors == 0 {
            return Err(ConfigError::invalid(
                "scaling.max_consecutive_errors",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Where the primary service exposes its load and status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub load_url: String,
    pub status_url: String,
    pub request_timeout_ms: u64,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            load_url: "http://127.0.0.1:3000/api/load".to_string(),
            status_url: "http://127.0.0.1:3000/api/status".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

impl PrimaryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// How to launch the worker and decide that it is up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Readiness probe. When unset, `startup_delay_ms` is used instead.
    pub ready_url: Option<String>,
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Time between SIGTERM and a forced kill.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

fn default_startup_delay_ms() -> u64 {
    2_000
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

fn default_stop_grace_ms() -> u64 {
    5_000
}

impl WorkerConfig {
    /// A worker config with defaults for everything but the command.
    pub fn for_command(command: &str) -> Self {
        Self {
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            ready_url: None,
            startup_delay_ms: default_startup_delay_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Pause between flipping the flag back and stopping the worker.
    pub settle_delay_ms: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1_000,
        }
    }
}

impl HandoffConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl LoadshiftConfig {
    /// Read, parse, and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: LoadshiftConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the supervisor cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.scaling.validate()?;
        if self.primary.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "primary.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        check_http_url("primary.load_url", &self.primary.load_url)?;
        check_http_url("primary.status_url", &self.primary.status_url)?;

        if self.worker.command.trim().is_empty() {
            return Err(ConfigError::invalid("worker.command", "must not be empty"));
        }
        if let Some(url) = &self.worker.ready_url {
            check_http_url("worker.ready_url", url)?;
        }
        if self.worker.ready_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "worker.ready_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.worker.ready_url.is_none()
            && self.worker.startup_delay_ms > self.worker.ready_timeout_ms
        {
            return Err(ConfigError::invalid(
                "worker.startup_delay_ms",
                format!(
                    "{}ms exceeds worker.ready_timeout_ms ({}ms)",
                    self.worker.startup_delay_ms, self.worker.ready_timeout_ms
                ),
            ));
        }
        Ok(())
    }

    /// Scaffold a config for the given worker command.
    pub fn scaffold(command: &str) -> Self {
        let mut worker = WorkerConfig::for_command(command);
        worker.args = vec!["--port".to_string(), "3001".to_string()];
        worker.ready_url = Some("http://127.0.0.1:3001/healthz".to_string());

        LoadshiftConfig {
            scaling: ScalingConfig::default(),
            primary: PrimaryConfig::default(),
            worker,
            handoff: HandoffConfig::default(),
        }
    }
}

/// Only plain `http://host[:port]/path` URLs are supported.
fn check_http_url(field: &'static str, url: &str) -> ConfigResult<()> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| ConfigError::invalid(field, format!("`{url}`: {e}")))?;
    if uri.scheme_str() != Some("http") {
        return Err(ConfigError::invalid(field, format!("`{url}` must start with http://")));
    }
    match uri.host() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ConfigError::invalid(field, format!("`{url}` has no host"))),
    }
}
