//! Configuration settings for the terminal daemon.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::control::DEFAULT_MAX_LINE_LENGTH;
use crate::error::TermError;
use crate::table::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL};

/// Main configuration structure for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Control socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Path to the Unix socket file.
    #[serde(default = "default_socket_path")]
    pub path: PathBuf,
    /// Socket file permissions (e.g., "0666"). Connecting needs write access
    /// to the socket file, so readers must be able to write it; mutations
    /// are gated by `allowed_peer_uids`.
    #[serde(default = "default_socket_permissions")]
    pub permissions: String,
    /// UIDs allowed to change the table. Any peer may dump.
    #[serde(default = "default_allowed_peer_uids")]
    pub allowed_peer_uids: Vec<u32>,
    /// Longest request line considered, in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Socket read/write timeout in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
    /// Maximum concurrent control connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Terminal table configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// Idle period after which a terminal without traffic is dropped.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of tracked terminals.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Whether control changes are audited.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Path to the audit log file.
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,
}

// Default value functions
fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/termd/term.sock")
}

/// Longest accepted idle timeout: one day.
pub const MAX_TTL_SECONDS: u64 = 86_400;

fn default_socket_permissions() -> String {
    "0666".to_string()
}

fn default_allowed_peer_uids() -> Vec<u32> {
    vec![0]
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    16
}

fn default_ttl() -> u64 {
    DEFAULT_TTL.as_secs()
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_audit_enabled() -> bool {
    true
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("/var/log/termd/audit.log")
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            path: default_socket_path(),
            permissions: default_socket_permissions(),
            allowed_peer_uids: default_allowed_peer_uids(),
            max_line_length: default_max_line_length(),
            socket_timeout_seconds: default_socket_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            log_path: default_audit_log_path(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            table: TableConfig::default(),
            logging: LoggingConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl TableConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl ControlConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_seconds)
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TermError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TermError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        let settings = Self::from_toml(&content).map_err(|e| match e {
            TermError::Config { message } => TermError::Config {
                message: format!("Invalid config file '{}': {}", path.display(), message),
            },
            other => other,
        })?;

        Ok(settings)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, TermError> {
        let settings: Settings = toml::from_str(content).map_err(|e| TermError::Config {
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), TermError> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(TermError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        // Validate log format
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(TermError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        // Validate socket permissions format
        if self.control.permissions.is_empty()
            || !self.control.permissions.chars().all(|c| ('0'..='7').contains(&c))
        {
            return Err(TermError::Config {
                message: format!(
                    "Invalid socket permissions '{}'. Must be octal (e.g., '0666')",
                    self.control.permissions
                ),
            });
        }

        if self.control.max_line_length < "clear".len() {
            return Err(TermError::Config {
                message: format!(
                    "max_line_length {} is too short for any command",
                    self.control.max_line_length
                ),
            });
        }

        if self.control.max_connections == 0 {
            return Err(TermError::Config {
                message: "max_connections must be at least 1".to_string(),
            });
        }

        if self.table.ttl_seconds == 0 || self.table.ttl_seconds > MAX_TTL_SECONDS {
            return Err(TermError::Config {
                message: format!(
                    "ttl_seconds must be between 1 and {}, got {}",
                    MAX_TTL_SECONDS, self.table.ttl_seconds
                ),
            });
        }

        if self.table.max_entries == 0 {
            return Err(TermError::Config {
                message: "max_entries must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
