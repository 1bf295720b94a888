//! Connection configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TSQUERY_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tsquery_protocol::{DEFAULT_QUERY_PORT, MAX_LINE_LENGTH};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default keepalive interval. The server drops idle query sessions after
/// five minutes.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 250;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// ServerQuery connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Query port.
    pub query_port: u16,
    /// Virtual server to select by voice port after connecting.
    pub server_port: Option<u16>,
    /// Virtual server to select by id after connecting.
    pub server_id: Option<u32>,
    /// Query login name.
    pub username: Option<String>,
    /// Query login password.
    pub password: Option<String>,
    /// Nickname to set once a server is selected.
    pub nickname: Option<String>,
    /// Send keepalives while the session is idle.
    pub keep_alive: bool,
    /// Keepalive interval in seconds.
    pub keep_alive_interval_secs: u64,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Longest line accepted from the server.
    pub max_line_length: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Reject queued and in-flight commands when the connection closes
    /// instead of keeping them for the next connect.
    pub reject_pending_on_close: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            query_port: DEFAULT_QUERY_PORT,
            server_port: None,
            server_id: None,
            username: None,
            password: None,
            nickname: None,
            keep_alive: true,
            keep_alive_interval_secs: DEFAULT_KEEPALIVE_SECS,
            connect_timeout_secs: 10,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_line_length: MAX_LINE_LENGTH,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            reject_pending_on_close: false,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, query_port: u16) -> Self {
        Self {
            host: host.into(),
            query_port,
            ..Self::default()
        }
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TSQUERY_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ConnectionConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies `TSQUERY_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("TSQUERY_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("TSQUERY_QUERY_PORT").and_then(|v| v.parse().ok()) {
            self.query_port = port;
        }
        if let Some(port) = lookup("TSQUERY_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server_port = Some(port);
        }
        if let Some(sid) = lookup("TSQUERY_SERVER_ID").and_then(|v| v.parse().ok()) {
            self.server_id = Some(sid);
        }
        if let Some(username) = lookup("TSQUERY_USERNAME") {
            self.username = Some(username);
        }
        if let Some(password) = lookup("TSQUERY_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(nickname) = lookup("TSQUERY_NICKNAME") {
            self.nickname = Some(nickname);
        }
        if let Some(keep_alive) = lookup("TSQUERY_KEEPALIVE") {
            self.keep_alive = keep_alive == "1" || keep_alive.to_lowercase() == "true";
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("host must not be empty".to_string()));
        }
        if self.query_port == 0 {
            return Err(ConfigError::ValidationError("query_port must not be 0".to_string()));
        }
        if self.keep_alive && self.keep_alive_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "keep_alive_interval_secs must be positive".to_string(),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::ValidationError(
                "username and password must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns `host:port` for the query socket.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.query_port)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = Some(port);
        self
    }

    pub fn with_server_id(mut self, sid: u32) -> Self {
        self.server_id = Some(sid);
        self
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval_secs = interval.as_secs();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_reject_pending_on_close(mut self, reject: bool) -> Self {
        self.reject_pending_on_close = reject;
        self
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.query_port, 10011);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(250));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(config.keep_alive);
        assert!(!config.reject_pending_on_close);
        assert_eq!(config.addr(), "127.0.0.1:10011");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::default().with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::default().with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_builders() {
        let config = ConnectionConfig::new("ts.example.org", 10011)
            .with_login("serveradmin", "secret")
            .with_server_port(9987)
            .with_nickname("bot")
            .with_keep_alive_interval(Duration::from_secs(60));
        assert_eq!(config.username.as_deref(), Some("serveradmin"));
        assert_eq!(config.server_port, Some(9987));
        assert_eq!(config.nickname.as_deref(), Some("bot"));
        assert_eq!(config.keep_alive_interval_secs, 60);
        assert_eq!(config.addr(), "ts.example.org:10011");
    }

    #[test]
    fn test_validation() {
        let config = ConnectionConfig::new("", 10011);
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let config = ConnectionConfig::new("host", 0);
        assert!(config.validate().is_err());

        let mut config = ConnectionConfig::default();
        config.username = Some("serveradmin".into());
        assert!(config.validate().is_err());

        let config = ConnectionConfig::default()
            .with_keep_alive_interval(Duration::ZERO)
            .with_keep_alive(false);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("TSQUERY_HOST", "10.0.0.5"),
            ("TSQUERY_QUERY_PORT", "10022"),
            ("TSQUERY_SERVER_PORT", "9987"),
            ("TSQUERY_USERNAME", "serveradmin"),
            ("TSQUERY_PASSWORD", "pw"),
            ("TSQUERY_KEEPALIVE", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = ConnectionConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.query_port, 10022);
        assert_eq!(config.server_port, Some(9987));
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert!(!config.keep_alive);
        assert_eq!(config.server_id, None);
    }

    #[test]
    fn test_overrides_ignore_unparsable_numbers() {
        let mut config = ConnectionConfig::default();
        config.apply_overrides(|key| (key == "TSQUERY_QUERY_PORT").then(|| "abc".to_string()));
        assert_eq!(config.query_port, 10011);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host: ts.example.org").unwrap();
        writeln!(file, "server_port: 9987").unwrap();
        writeln!(file, "keep_alive_interval_secs: 120").unwrap();

        let config = ConnectionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host, "ts.example.org");
        assert_eq!(config.server_port, Some(9987));
        assert_eq!(config.keep_alive_interval_secs, 120);
        assert_eq!(config.query_port, 10011);
    }

    #[test]
    fn test_from_missing_file() {
        let err = ConnectionConfig::from_file("/nonexistent/tsquery.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = ConnectionConfig::default().with_server_id(3);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ConnectionConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server_id, Some(3));
        assert_eq!(parsed.query_port, config.query_port);
    }
}
