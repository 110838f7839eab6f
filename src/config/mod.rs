//! Configuration Management Module
//!
//! Handles persistent storage of saved connections and command history, and
//! read-only parsing of the user's SSH client config.

pub mod ssh_config;
pub mod storage;
pub mod types;

pub use ssh_config::{
    identity_files_for, match_host_pattern, parse_ssh_config, SshConfigBlock, SshConfigError,
};
pub use storage::{config_dir, connections_file, ConfigStorage, StorageError};
pub use types::{
    ConfigFile, Connection, NewConnection, Settings, ValidationError, CONFIG_VERSION,
    DEFAULT_HISTORY_LIMIT, DEFAULT_PORT,
};
