//! Configuration loading and typed config structures for Encore.
//!
//! The canonical configuration lives in `encore-config.yaml` next to the
//! binary (path overridable with `ENCORE_CONFIG`). Every field has a
//! default, so an absent file or an empty document yields a runnable
//! development setup backed by the in-memory repository.

use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

/// Longest offset a real timezone can have, in minutes.
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The YAML parsed but a value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level Encore configuration.
///
/// Mirrors the structure of `encore-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EncoreConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable storage settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Queue engine tuning.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Push-channel settings.
    #[serde(default)]
    pub observers: ObserverConfig,

    /// Statistics settings.
    #[serde(default)]
    pub stats: StatsConfig,

    /// External metadata lookup settings.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl EncoreConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `DATABASE_URL` overrides `database.url`
    /// - `ENCORE_PORT` overrides `server.port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    ///
    /// Environment overrides apply in both cases.
    ///
    /// # Errors
    ///
    /// Same as [`EncoreConfig::from_file`].
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        tracing::info!(path = %path.display(), "No config file found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.database.url = Some(url);
            }
        }
        if let Ok(port) = std::env::var("ENCORE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("ENCORE_PORT '{port}': {e}")))?;
        }
        Ok(())
    }

    /// Check value ranges the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.persist_max_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "queue.persist_max_attempts must be at least 1",
            )));
        }
        if self.queue.command_buffer == 0 {
            return Err(ConfigError::Invalid(String::from(
                "queue.command_buffer must be at least 1",
            )));
        }
        if self.observers.buffer_size == 0 {
            return Err(ConfigError::Invalid(String::from(
                "observers.buffer_size must be at least 1",
            )));
        }
        if self.observers.stats_interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "observers.stats_interval_secs must be at least 1",
            )));
        }
        if let Some(offset) = self.stats.utc_offset_minutes {
            if offset.abs() > MAX_UTC_OFFSET_MINUTES {
                return Err(ConfigError::Invalid(format!(
                    "stats.utc_offset_minutes {offset} is outside +/-{MAX_UTC_OFFSET_MINUTES}"
                )));
            }
        }
        Ok(())
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` URL. `None` selects the in-memory repository.
    #[serde(default)]
    pub url: Option<String>,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Queue engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    /// Number of most recent history entries included in snapshots.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Attempts per durable write before entering degraded mode.
    #[serde(default = "default_persist_max_attempts")]
    pub persist_max_attempts: u32,

    /// Delay before the first retry; doubled for each further retry.
    #[serde(default = "default_persist_retry_backoff_ms")]
    pub persist_retry_backoff_ms: u64,

    /// Window in which the same requester may not resubmit the same link.
    /// Zero disables duplicate detection.
    #[serde(default = "default_duplicate_cooldown_secs")]
    pub duplicate_cooldown_secs: u64,

    /// Capacity of the engine's command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl QueueConfig {
    /// Initial retry backoff as a [`Duration`].
    pub const fn persist_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_retry_backoff_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            persist_max_attempts: default_persist_max_attempts(),
            persist_retry_backoff_ms: default_persist_retry_backoff_ms(),
            duplicate_cooldown_secs: default_duplicate_cooldown_secs(),
            command_buffer: default_command_buffer(),
        }
    }
}

/// Push-channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Messages buffered per observer before it is dropped as too slow.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Seconds between aggregate statistics broadcasts.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Length of the all-time top requesters list.
    #[serde(default = "default_top_requesters")]
    pub top_requesters: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            stats_interval_secs: default_stats_interval_secs(),
            top_requesters: default_top_requesters(),
        }
    }
}

/// Statistics configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatsConfig {
    /// Fixed offset from UTC used for the "today" boundary.
    /// `None` uses the server's local timezone.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

impl StatsConfig {
    /// The configured fixed offset, if any.
    pub fn fixed_offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .and_then(|m| m.checked_mul(60))
            .and_then(FixedOffset::east_opt)
    }
}

/// External metadata lookup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetadataConfig {
    /// `oEmbed` endpoint queried for title, channel, and thumbnail.
    #[serde(default = "default_oembed_url")]
    pub oembed_url: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_metadata_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            oembed_url: default_oembed_url(),
            timeout_ms: default_metadata_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8080
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_history_window() -> usize {
    50
}

const fn default_persist_max_attempts() -> u32 {
    3
}

const fn default_persist_retry_backoff_ms() -> u64 {
    50
}

const fn default_duplicate_cooldown_secs() -> u64 {
    3600
}

const fn default_command_buffer() -> usize {
    256
}

const fn default_buffer_size() -> usize {
    64
}

const fn default_stats_interval_secs() -> u64 {
    30
}

const fn default_top_requesters() -> usize {
    10
}

fn default_oembed_url() -> String {
    String::from("https://www.youtube.com/oembed")
}

const fn default_metadata_timeout_ms() -> u64 {
    5000
}
