//! Persisted configuration types

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default bound for the command history
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// A saved remote host the operator can connect to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Display name, intended (not required) to be unique
    pub alias: String,
    /// Hostname or IP address
    pub host: String,
    /// SSH port; zero means "use the default"
    #[serde(default = "default_port")]
    pub port: u16,
    /// Remote username
    pub user: String,
    /// Optional explicit private key path (may start with `~`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

impl Connection {
    pub fn new(
        alias: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            alias: alias.into(),
            host: host.into(),
            port: if port == 0 { DEFAULT_PORT } else { port },
            user: user.into(),
            key_path: None,
        }
    }

    pub fn with_key_path(mut self, key_path: impl Into<String>) -> Self {
        let key_path = key_path.into();
        self.key_path = if key_path.trim().is_empty() {
            None
        } else {
            Some(key_path)
        };
        self
    }

    /// Port actually dialed (files written by hand may carry `0`)
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_PORT
        } else {
            self.port
        }
    }

    /// `host:port` for logs and dialing
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }
}

/// Tunables stored alongside the connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum number of remembered commands
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// TCP dial + handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// SSH keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Value sent as `LANG` / `LC_ALL` with every command
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_locale() -> String {
    "en_US.UTF-8".to_string()
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            connect_timeout_secs: default_connect_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            locale: default_locale(),
        }
    }
}

/// On-disk layout of `connections.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub connections: Vec<Connection>,

    /// Oldest first
    #[serde(default)]
    pub command_history: Vec<String>,

    #[serde(default)]
    pub settings: Settings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            connections: Vec::new(),
            command_history: Vec::new(),
            settings: Settings::default(),
        }
    }
}

/// Fields collected when the operator adds a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewConnection {
    pub alias: String,
    pub host: String,
    pub user: String,
    /// Raw port text; empty or unparsable falls back to 22
    pub port: String,
    pub key_path: String,
}

/// Reasons a [`NewConnection`] cannot be saved
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
}

impl NewConnection {
    /// Check required fields and build the connection to persist
    pub fn validate(&self) -> Result<Connection, ValidationError> {
        let alias = self.alias.trim();
        let host = self.host.trim();
        let user = self.user.trim();

        if alias.is_empty() {
            return Err(ValidationError::MissingField("alias"));
        }
        if host.is_empty() {
            return Err(ValidationError::MissingField("host"));
        }
        if user.is_empty() {
            return Err(ValidationError::MissingField("user"));
        }

        let port = self.port.trim().parse::<u16>().unwrap_or(DEFAULT_PORT);

        Ok(Connection::new(alias, host, user, port).with_key_path(self.key_path.trim()))
    }
}
