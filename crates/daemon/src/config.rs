//! Configuration management for the OnPoint daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/onpoint/config.toml`.
//!
//! The loaded [`Config`] is passed explicitly to every component at
//! construction time; nothing reads process environment after start-up.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default address the HTTP/WebSocket server listens on.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

/// Default base URL of the Generative Language API.
pub const DEFAULT_AI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_addr must be a socket address like 127.0.0.1:8000, got {0}")]
    InvalidBindAddr(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("read_chunk_size must be between 1 and 65536, got {0}")]
    InvalidReadChunkSize(usize),

    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("close_grace_ms must be at most 10000, got {0}")]
    InvalidCloseGrace(u64),

    #[error("exec timeout_secs must be between 1 and 300, got {0}")]
    InvalidExecTimeout(u64),

    #[error("terminal shell path does not exist: {0}")]
    InvalidShellPath(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the OnPoint daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server and logging configuration.
    pub server: ServerConfig,

    /// Workspace (sandbox root) configuration.
    pub workspace: WorkspaceConfig,

    /// Interactive terminal configuration.
    pub terminal: TerminalConfig,

    /// Code execution helper configuration.
    pub exec: ExecConfig,

    /// AI generation service configuration.
    pub ai: AiConfig,
}

/// HTTP server and logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_addr: String,

    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Workspace configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root directory every file operation is confined to.
    pub root: PathBuf,

    /// Name of the snapshot directory inside the root.
    pub versions_dir: String,

    /// Name of the settings file, both at the root and inside each workspace.
    pub settings_file: String,
}

/// How terminal output is framed on the WebSocket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FrameMode {
    /// UTF-8 text frames; multi-byte characters are never split.
    #[default]
    Text,
    /// Raw binary frames.
    Binary,
}

/// Interactive terminal configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shell started for every terminal connection.
    pub shell: String,

    /// Start the shell as a login shell (`-l`).
    pub login: bool,

    /// Value of `TERM` in the shell environment.
    pub term: String,

    /// Initial terminal width in columns.
    pub cols: u16,

    /// Initial terminal height in rows.
    pub rows: u16,

    /// Maximum number of bytes read from the PTY per outbound message.
    pub read_chunk_size: usize,

    /// How long teardown waits for the shell to exit before SIGKILL.
    pub close_grace_ms: u64,

    /// Close sessions whose client sent nothing for this long (0 = never).
    pub idle_timeout_secs: u64,

    /// Maximum number of concurrent terminal sessions.
    pub max_sessions: usize,

    /// Outbound frame type.
    pub frame_mode: FrameMode,
}

/// Code execution helper configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecConfig {
    /// Wall-clock limit for one run.
    pub timeout_secs: u64,

    /// Python interpreter.
    pub python: String,

    /// JavaScript interpreter.
    pub node: String,
}

/// AI generation service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    /// API key for the generation service. Never written back to disk.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Model name.
    pub model: String,

    /// Base URL of the API.
    pub endpoint: String,

    /// Request timeout.
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./workspace"),
            versions_dir: ".onpoint_versions".to_string(),
            settings_file: "settings.json".to_string(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            login: true,
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
            read_chunk_size: 1024,
            close_grace_ms: 500,
            idle_timeout_secs: 0,
            max_sessions: 32,
            frame_mode: FrameMode::Text,
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 6,
            python: "python3".to_string(),
            node: "node".to_string(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            endpoint: DEFAULT_AI_ENDPOINT.to_string(),
            timeout_secs: 120,
        }
    }
}

impl TerminalConfig {
    /// Grace period granted to the shell during teardown.
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Idle timeout, if enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl ExecConfig {
    /// Wall-clock limit for one run.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AiConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("onpoint")
        .join("config.toml")
}

/// Returns the default shell: `$SHELL`, then bash, then sh.
fn default_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            return shell;
        }
    }
    if Path::new("/bin/bash").exists() {
        "/bin/bash".to_string()
    } else {
        "/bin/sh".to_string()
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - ONPOINT_WORKSPACE: Override the workspace root
    /// - ONPOINT_BIND: Override the listen address
    /// - ONPOINT_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - GEMINI_API_KEY: API key for the AI generation service
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = non_empty_env("ONPOINT_WORKSPACE") {
            tracing::info!("Overriding workspace root from environment: {}", root);
            self.workspace.root = PathBuf::from(root);
        }

        if let Some(addr) = non_empty_env("ONPOINT_BIND") {
            tracing::info!("Overriding bind_addr from environment: {}", addr);
            self.server.bind_addr = addr;
        }

        if let Some(level) = non_empty_env("ONPOINT_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.server.log_level = level;
        }

        if let Some(key) = non_empty_env("GEMINI_API_KEY") {
            tracing::debug!("Using AI API key from environment");
            self.ai.api_key = Some(key);
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.server.bind_addr.clone()));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        let chunk = self.terminal.read_chunk_size;
        if !(1..=65536).contains(&chunk) {
            return Err(ConfigError::InvalidReadChunkSize(chunk));
        }

        let max = self.terminal.max_sessions;
        if !(1..=1000).contains(&max) {
            return Err(ConfigError::InvalidMaxSessions(max));
        }

        if self.terminal.close_grace_ms > 10_000 {
            return Err(ConfigError::InvalidCloseGrace(self.terminal.close_grace_ms));
        }

        if !(1..=300).contains(&self.exec.timeout_secs) {
            return Err(ConfigError::InvalidExecTimeout(self.exec.timeout_secs));
        }

        let shell_path = Path::new(&self.terminal.shell);
        let shell_found = if shell_path.is_absolute() {
            shell_path.exists()
        } else {
            which::which(&self.terminal.shell).is_ok()
        };
        if !shell_found {
            return Err(ConfigError::InvalidShellPath(self.terminal.shell.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist. The API key is not
    /// written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr, "127.0.0.1:8000");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.workspace.versions_dir, ".onpoint_versions");
        assert_eq!(config.terminal.read_chunk_size, 1024);
        assert_eq!(config.terminal.idle_timeout_secs, 0);
        assert_eq!(config.terminal.frame_mode, FrameMode::Text);
        assert_eq!(config.exec.timeout_secs, 6);
        assert!(config.ai.api_key.is_none());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
log_level = "debug"

[terminal]
max_sessions = 5
frame_mode = "binary"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.terminal.max_sessions, 5);
        assert_eq!(config.terminal.frame_mode, FrameMode::Binary);
        assert_eq!(config.server.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.exec.python, "python3");
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
bind_addr = "0.0.0.0:9000"
allowed_origins = ["http://editor.local"]
log_level = "trace"
log_dir = "/var/log/onpoint"

[workspace]
root = "/srv/workspace"
versions_dir = ".history"
settings_file = "onpoint.json"

[terminal]
shell = "/bin/sh"
login = false
term = "xterm"
cols = 120
rows = 40
read_chunk_size = 4096
close_grace_ms = 250
idle_timeout_secs = 600
max_sessions = 4

[exec]
timeout_secs = 10
python = "/usr/bin/python3"
node = "/usr/bin/node"

[ai]
api_key = "from-file"
model = "gemini-pro"
timeout_secs = 30
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.server.allowed_origins, vec!["http://editor.local"]);
        assert_eq!(config.server.log_dir, Some(PathBuf::from("/var/log/onpoint")));
        assert_eq!(config.workspace.root, PathBuf::from("/srv/workspace"));
        assert_eq!(config.workspace.versions_dir, ".history");
        assert_eq!(config.workspace.settings_file, "onpoint.json");
        assert_eq!(config.terminal.shell, "/bin/sh");
        assert!(!config.terminal.login);
        assert_eq!(config.terminal.cols, 120);
        assert_eq!(config.terminal.read_chunk_size, 4096);
        assert_eq!(config.terminal.close_grace(), Duration::from_millis(250));
        assert_eq!(
            config.terminal.idle_timeout(),
            Some(Duration::from_secs(600))
        );
        assert_eq!(config.exec.timeout(), Duration::from_secs(10));
        assert_eq!(config.ai.api_key.as_deref(), Some("from-file"));
        assert_eq!(config.ai.model, "gemini-pro");
        assert_eq!(config.ai.endpoint, DEFAULT_AI_ENDPOINT);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[server\nlog_level = \"debug\"\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[terminal]
max_sessions = "many"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_idle_timeout_disabled_by_zero() {
        let config = TerminalConfig::default();
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn test_to_toml_never_contains_api_key() {
        let mut config = Config::default();
        config.ai.api_key = Some("secret-key".to_string());

        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[terminal]"));
        assert!(toml.contains("[ai]"));
        assert!(!toml.contains("secret-key"));
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.server.log_level = "warn".to_string();
        original.terminal.max_sessions = 42;
        original.terminal.frame_mode = FrameMode::Binary;
        original.exec.timeout_secs = 9;

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.server.log_level = "debug".to_string();
        original.terminal.max_sessions = 15;

        original.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("onpoint"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("ONPOINT_WORKSPACE", "/tmp/onpoint-ws");
        std::env::set_var("ONPOINT_BIND", "127.0.0.1:9999");
        std::env::set_var("ONPOINT_LOG_LEVEL", "debug");
        std::env::set_var("GEMINI_API_KEY", "env-key");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.workspace.root, PathBuf::from("/tmp/onpoint-ws"));
        assert_eq!(config.server.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.ai.api_key.as_deref(), Some("env-key"));

        std::env::remove_var("ONPOINT_WORKSPACE");
        std::env::remove_var("ONPOINT_BIND");
        std::env::remove_var("ONPOINT_LOG_LEVEL");
        std::env::remove_var("GEMINI_API_KEY");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("ONPOINT_BIND", "");
        std::env::remove_var("GEMINI_API_KEY");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.bind_addr, DEFAULT_BIND_ADDR);
        assert!(config.ai.api_key.is_none());

        std::env::remove_var("ONPOINT_BIND");
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bind_addr() {
        let mut config = Config::default();
        config.server.bind_addr = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddr("localhost".to_string()))
        );
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.server.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.server.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_terminal_limits() {
        let mut config = Config::default();
        config.terminal.read_chunk_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidReadChunkSize(0)));

        let mut config = Config::default();
        config.terminal.max_sessions = 1001;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxSessions(1001)));

        let mut config = Config::default();
        config.terminal.close_grace_ms = 10_001;
        assert_eq!(config.validate(), Err(ConfigError::InvalidCloseGrace(10_001)));

        let mut config = Config::default();
        config.terminal.max_sessions = 1;
        config.terminal.read_chunk_size = 65536;
        config.terminal.close_grace_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_exec_timeout() {
        let mut config = Config::default();
        config.exec.timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidExecTimeout(0)));
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_shell_path() {
        let mut config = Config::default();
        config.terminal.shell = "/bin/sh".to_string();
        assert!(config.validate().is_ok());

        config.terminal.shell = "sh".to_string();
        assert!(config.validate().is_ok());

        config.terminal.shell = "/nonexistent/shell".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShellPath("/nonexistent/shell".to_string()))
        );
    }
}
