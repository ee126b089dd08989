//! Configuration loading for the approval client.
//!
//! Configuration lives in `jeye.yml` (or `jeye.yaml`). Every field has a
//! default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable overriding `server.base_url`.
pub const ENV_SERVER_URL: &str = "JEYE_SERVER_URL";
/// Environment variable overriding `server.token`.
pub const ENV_TOKEN: &str = "JEYE_TOKEN";

/// Configuration file names looked up in the working directory.
pub const CONFIG_CANDIDATES: [&str; 2] = ["jeye.yml", "jeye.yaml"];

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JEyeConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub feed: FeedConfig,
    pub voice: VoiceConfig,
}

/// Approval API endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub stream_path: String,
    pub decision_path: String,
    pub kill_path: String,
    pub status_path: String,
    pub request_timeout_secs: u64,
    /// Bearer token sent with every request.
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            stream_path: "/api/events/stream".to_string(),
            decision_path: "/api/trust/decision".to_string(),
            kill_path: "/api/trust/kill".to_string(),
            status_path: "/api/trust/status".to_string(),
            request_timeout_secs: 10,
            token: None,
        }
    }
}

impl ServerConfig {
    /// Joins `base_url` and `path` with exactly one slash between them.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Event stream reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Capacity of the channel between the stream task and the dispatcher.
    pub buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

/// Voice override channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub enabled: bool,
    /// Optional phrases allowed before the command word.
    pub wake_phrases: Vec<String>,
    pub restart_delay_ms: u64,
    pub dedupe_window_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            wake_phrases: vec![
                "hey j eye".to_string(),
                "ok j eye".to_string(),
                "j eye".to_string(),
                "jay eye".to_string(),
            ],
            restart_delay_ms: 250,
            dedupe_window_ms: 1500,
        }
    }
}

impl VoiceConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.dedupe_window_ms)
    }
}

impl JEyeConfig {
    /// Parses configuration from YAML text.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::parse_yaml(&content)
    }

    /// Loads the first config candidate found in `root`, or defaults.
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        for candidate in CONFIG_CANDIDATES {
            let path = root.join(candidate);
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        debug!(root = %root.display(), "No config file found, using defaults");
        Ok(Self::default())
    }

    /// Applies `JEYE_SERVER_URL` / `JEYE_TOKEN` from the environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(ENV_SERVER_URL).ok(),
            std::env::var(ENV_TOKEN).ok(),
        )
    }

    /// Applies explicit overrides; empty values are ignored.
    #[must_use]
    pub fn with_overrides(mut self, base_url: Option<String>, token: Option<String>) -> Self {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            self.server.base_url = url;
        }
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.server.token = Some(token);
        }
        self
    }

    /// Rejects configurations the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server.base_url must not be empty".into()));
        }
        if self.feed.capacity == 0 {
            return Err(ConfigError::Invalid("feed.capacity must be at least 1".into()));
        }
        if self.stream.initial_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "stream.initial_backoff_ms must be positive".into(),
            ));
        }
        if self.stream.max_backoff_ms < self.stream.initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "stream.max_backoff_ms must not be below stream.initial_backoff_ms".into(),
            ));
        }
        if self.stream.buffer == 0 {
            return Err(ConfigError::Invalid("stream.buffer must be at least 1".into()));
        }
        Ok(())
    }
}
