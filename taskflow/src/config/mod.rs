//! Configuration system for the `TaskFlow` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskflow/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::channel::{ChannelConfig, ReconnectPolicy};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    api: ApiFileConfig,
    channel: ChannelFileConfig,
    session: SessionFileConfig,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[channel]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChannelFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    auth_retry_secs: Option<u64>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    liveness_initial_interval_secs: Option<u64>,
    liveness_interval_secs: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- REST --
    /// Base URL of the REST collaborator, including the `/api` prefix.
    pub api_url: String,
    /// Per-request timeout for REST calls.
    pub request_timeout: Duration,

    // -- Channel --
    /// Realtime channel settings.
    pub channel: ChannelConfig,

    // -- Session --
    /// Where the command-line front end keeps the session credential.
    /// `None` keeps it in memory only.
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            request_timeout: Duration::from_secs(30),
            channel: ChannelConfig::default(),
            session_file: default_session_file(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/taskflow/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let channel_defaults = defaults.channel;
        let fc = &file.channel;

        Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.api.base_url.clone())
                .unwrap_or(defaults.api_url),
            request_timeout: file
                .api
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            channel: ChannelConfig {
                url: cli
                    .socket_url
                    .clone()
                    .or_else(|| fc.url.clone())
                    .unwrap_or(channel_defaults.url),
                connect_timeout: fc
                    .connect_timeout_secs
                    .map_or(channel_defaults.connect_timeout, Duration::from_secs),
                auth_retry_delay: fc
                    .auth_retry_secs
                    .map_or(channel_defaults.auth_retry_delay, Duration::from_secs),
                reconnect: ReconnectPolicy {
                    initial_delay: fc
                        .reconnect_initial_delay_ms
                        .map_or(channel_defaults.reconnect.initial_delay, Duration::from_millis),
                    max_delay: fc
                        .reconnect_max_delay_ms
                        .map_or(channel_defaults.reconnect.max_delay, Duration::from_millis),
                    max_attempts: fc
                        .reconnect_max_attempts
                        .unwrap_or(channel_defaults.reconnect.max_attempts),
                },
                liveness_initial_interval: fc.liveness_initial_interval_secs.map_or(
                    channel_defaults.liveness_initial_interval,
                    Duration::from_secs,
                ),
                liveness_interval: fc
                    .liveness_interval_secs
                    .map_or(channel_defaults.liveness_interval, Duration::from_secs),
                event_buffer: fc.event_buffer.unwrap_or(channel_defaults.event_buffer),
            },
            session_file: cli
                .session_file
                .clone()
                .or_else(|| file.session.file.clone())
                .or(defaults.session_file),
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task management client with live notifications")]
pub struct CliArgs {
    /// Base URL of the REST API (e.g. `http://localhost:5000/api`).
    #[arg(long, env = "TASKFLOW_API_URL", global = true)]
    pub api_url: Option<String>,

    /// WebSocket URL of the realtime channel.
    #[arg(long, env = "TASKFLOW_SOCKET_URL", global = true)]
    pub socket_url: Option<String>,

    /// Path to config file (default: `~/.config/taskflow/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Where to keep the session credential between invocations.
    #[arg(long, env = "TASKFLOW_SESSION_FILE", global = true)]
    pub session_file: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKFLOW_LOG", global = true)]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskflow.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Option<crate::cli::Command>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_session_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("taskflow").join("session.json"))
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskflow").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
