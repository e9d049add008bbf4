//! Configuration system for the Parley relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/parley-relay/config.toml`)
//! 4. Compiled defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_proto::codec::DEFAULT_MAX_FRAME_SIZE;

use crate::router::DenialPolicy;

/// Errors that can occur when loading relay configuration.
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

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    storage: StorageFileConfig,
    logging: LoggingFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
    max_file_size: Option<u64>,
    max_connections: Option<usize>,
    read_timeout_secs: Option<u64>,
    denial_policy: Option<DenialPolicy>,
}

/// `[storage]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    database_path: Option<PathBuf>,
    files_dir: Option<PathBuf>,
}

/// `[logging]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LoggingFileConfig {
    file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Parley relay server")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "PARLEY_ADDR", global = true)]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/parley-relay/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database holding users, followers and messages.
    #[arg(long, env = "PARLEY_DB", global = true)]
    pub database: Option<PathBuf>,

    /// Directory where received files are written.
    #[arg(long, global = true)]
    pub files_dir: Option<PathBuf>,

    /// Maximum frame payload size in bytes.
    #[arg(long, global = true)]
    pub max_frame_size: Option<usize>,

    /// Maximum announced file size in bytes.
    #[arg(long, global = true)]
    pub max_file_size: Option<u64>,

    /// Maximum number of concurrently served connections (0 = unbounded).
    #[arg(long, global = true)]
    pub max_connections: Option<usize>,

    /// Close connections that stay silent for this many seconds (0 = never).
    #[arg(long, global = true)]
    pub read_timeout_secs: Option<u64>,

    /// What to do when a sender does not follow the recipient.
    #[arg(long, value_enum, global = true)]
    pub denial_policy: Option<DenialPolicy>,

    /// Write logs to this file instead of stderr.
    #[arg(long, env = "PARLEY_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PARLEY_LOG", global = true)]
    pub log_level: String,

    /// Administrative command; the server runs when omitted.
    #[command(subcommand)]
    pub command: Option<crate::admin::Command>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `127.0.0.1:5000`).
    pub bind_addr: String,
    /// Maximum allowed frame payload size in bytes.
    pub max_frame_size: usize,
    /// Maximum allowed file payload size in bytes.
    pub max_file_size: u64,
    /// Bound on concurrently served connections; unbounded when `None`.
    /// A configured `0` also means unbounded.
    pub max_connections: Option<usize>,
    /// Idle read timeout per connection; none when `None` or configured as `0`.
    pub read_timeout: Option<Duration>,
    /// Behavior when the follow check denies delivery.
    pub denial_policy: DenialPolicy,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Directory for received files.
    pub files_dir: PathBuf,
    /// Log file; stderr when `None`.
    pub log_file: Option<PathBuf>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().map_or_else(|| PathBuf::from("."), |d| d.join("parley"));
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_file_size: 16 * 1024 * 1024,
            max_connections: None,
            read_timeout: None,
            denial_policy: DenialPolicy::Silent,
            database_path: data_dir.join("parley.db"),
            files_dir: data_dir.join("files"),
            log_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: RelayConfigFile) -> Self {
        let defaults = Self::default();
        let RelayConfigFile {
            server,
            storage,
            logging,
        } = file;

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            max_file_size: cli
                .max_file_size
                .or(server.max_file_size)
                .unwrap_or(defaults.max_file_size),
            max_connections: cli
                .max_connections
                .or(server.max_connections)
                .filter(|&n| n > 0),
            read_timeout: cli
                .read_timeout_secs
                .or(server.read_timeout_secs)
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            denial_policy: cli
                .denial_policy
                .or(server.denial_policy)
                .unwrap_or(defaults.denial_policy),
            database_path: cli
                .database
                .clone()
                .or(storage.database_path)
                .unwrap_or(defaults.database_path),
            files_dir: cli
                .files_dir
                .clone()
                .or(storage.files_dir)
                .unwrap_or(defaults.files_dir),
            log_file: cli.log_file.clone().or(logging.file),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(explicit_path: Option<&Path>) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("parley-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
