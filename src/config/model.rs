//! Configuration data model.
//!
//! All structs deserialize from TOML. Everything except
//! `server` has a default.

use crate::error::EngineError;
use serde::Deserialize;
use std::time::Duration;

use super::nickname::generate_nickname;

/// Session configuration for one server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Hostname or IP address of the IRC server.
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    /// Nickname and username sent at registration.
    #[serde(default = "default_nickname")]
    pub user: String,
    #[serde(default)]
    pub realname: Option<String>,
    /// Tried in order when the server reports our nick as taken.
    #[serde(default)]
    pub alt_nicks: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    /// Names from the handler extension catalog to enable.
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub quit_message: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for a JOIN echo. 0 waits forever.
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// A config with defaults for everything but the server, nick and
    /// channel list.
    pub fn new(server: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: default_port(),
            tls: true,
            user: user.into(),
            realname: None,
            alt_nicks: Vec::new(),
            channels: Vec::new(),
            extensions: Vec::new(),
            accept_invalid_certs: false,
            quit_message: None,
            poll_interval_ms: default_poll_interval(),
            join_timeout_secs: default_join_timeout(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.server.trim().is_empty() {
            return Err(EngineError::Config("server must not be empty".into()));
        }
        if self.user.trim().is_empty() || self.user.contains(' ') {
            return Err(EngineError::Config(format!("invalid user {:?}", self.user)));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Bot-style sessions must have somewhere to go.
    pub fn require_channels(&self) -> Result<(), EngineError> {
        if self.channels.is_empty() {
            return Err(EngineError::Config("at least one channel is required".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn join_timeout(&self) -> Option<Duration> {
        (self.join_timeout_secs > 0).then(|| Duration::from_secs(self.join_timeout_secs))
    }
}

/// Session restart policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total sessions, the first included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Also reconnect when the server closes the connection.
    #[serde(default)]
    pub reconnect_on_close: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            reconnect_on_close: false,
        }
    }
}

/// Chat transcript settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_true")]
    pub log_channels: bool,
    #[serde(default)]
    pub log_queries: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_log_dir(),
            log_channels: true,
            log_queries: false,
        }
    }
}

fn default_nickname() -> String {
    generate_nickname()
}
fn default_port() -> u16 {
    6697
}
fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_join_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    2000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_log_dir() -> String {
    "~/.local/share/crabirc/logs".to_string()
}
