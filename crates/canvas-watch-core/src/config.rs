//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level canvas-watch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Remote product API endpoint and credential.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,
}

impl RemoteConfig {
    /// Resolve the bearer token: check `auth_token` first, then `auth_token_env`.
    pub fn resolve_auth_token(&self) -> Option<String> {
        resolve_secret_field(&self.auth_token, &self.auth_token_env)
    }
}

/// Canvas tracking behaviour. All delays are fixed policy values, not per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_name_env: Option<String>,

    /// Window after subscription start during which the service reports
    /// itself connected without having seen an event (default: 30).
    #[serde(default = "default_liveness_grace_secs")]
    pub liveness_grace_secs: u64,

    /// Wait before the polling fallback issues its first request (default: 3).
    #[serde(default = "default_poll_initial_delay_secs")]
    pub poll_initial_delay_secs: u64,

    /// Maximum polling fallback requests per subscription (default: 10).
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Delay between polling fallback requests (default: 3).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Delay before the one-shot canvas name backfill runs (default: 5).
    #[serde(default = "default_name_backfill_delay_secs")]
    pub name_backfill_delay_secs: u64,

    /// Timeout for client listing during resolution (default: 30).
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,

    /// Timeout for interactive resource fetches (default: 5).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// An open stream with no data (heartbeats included) for this long is
    /// treated as dead and reconnected (default: 90).
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

fn default_liveness_grace_secs() -> u64 {
    30
}

fn default_poll_initial_delay_secs() -> u64 {
    3
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_name_backfill_delay_secs() -> u64 {
    5
}

fn default_resolve_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_stream_idle_timeout_secs() -> u64 {
    90
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            installation_name: None,
            installation_name_env: None,
            liveness_grace_secs: default_liveness_grace_secs(),
            poll_initial_delay_secs: default_poll_initial_delay_secs(),
            poll_attempts: default_poll_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
            name_backfill_delay_secs: default_name_backfill_delay_secs(),
            resolve_timeout_secs: default_resolve_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
        }
    }
}

impl TrackingConfig {
    /// The configured installation name, if any. The device-name fallback is
    /// applied by the resolver, not here.
    pub fn resolve_installation_name(&self) -> Option<String> {
        resolve_secret_field(&self.installation_name, &self.installation_name_env)
    }

    pub fn liveness_grace(&self) -> Duration {
        Duration::from_secs(self.liveness_grace_secs)
    }

    pub fn poll_initial_delay(&self) -> Duration {
        Duration::from_secs(self.poll_initial_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn name_backfill_delay(&self) -> Duration {
        Duration::from_secs(self.name_backfill_delay_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_gateway_port() -> u16 {
    18790
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "canvas_watch_tracker=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::CanvasWatchError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::CanvasWatchError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn base_url(&self) -> Option<String> {
        self.remote
            .as_ref()
            .and_then(|r| r.base_url.clone())
            .filter(|u| !u.is_empty())
            .map(|u| u.trim_end_matches('/').to_string())
    }

    pub fn auth_token(&self) -> Option<String> {
        self.remote.as_ref().and_then(|r| r.resolve_auth_token())
    }

    /// Tracking settings, falling back to defaults when the section is absent.
    pub fn tracking(&self) -> TrackingConfig {
        self.tracking.clone().unwrap_or_default()
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .map(|g| g.port)
            .unwrap_or_else(default_gateway_port)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        match self.base_url() {
            None => errors.push("remote.base_url is not configured".to_string()),
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                errors.push(format!("remote.base_url must be an http(s) URL: {url}"));
            }
            Some(_) => {}
        }

        if self.auth_token().is_none() {
            warnings.push("No remote auth token configured; requests are unauthenticated".into());
        }

        let tracking = self.tracking();
        if tracking.resolve_installation_name().is_none() {
            warnings.push(
                "No installation name configured; the device name will be used".to_string(),
            );
        }
        if tracking.poll_attempts == 0 {
            errors.push("tracking.poll_attempts cannot be 0".to_string());
        }
        if tracking.stream_idle_timeout_secs == 0 {
            errors.push("tracking.stream_idle_timeout_secs cannot be 0".to_string());
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for canvas-watch data: `~/.canvas_watch/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".canvas_watch")
}
