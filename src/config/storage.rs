//! Configuration Storage
//!
//! Reads and writes `connections.json`.
//! Location: `~/.config/shellfleet/connections.json`, or `$SHELLFLEET_CONFIG` when set.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{ConfigFile, CONFIG_VERSION};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "SHELLFLEET_CONFIG";

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the ShellFleet configuration directory
pub fn config_dir() -> Result<PathBuf, StorageError> {
    dirs::home_dir()
        .map(|home| home.join(".config").join("shellfleet"))
        .ok_or(StorageError::NoConfigDir)
}

/// Get the connections file path
pub fn connections_file() -> Result<PathBuf, StorageError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("connections.json"))
}

/// Configuration storage manager
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Create a new storage manager with default path
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            path: connections_file()?,
        })
    }

    /// Create storage manager with custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Load configuration from disk
    ///
    /// A missing file yields the default (empty) config. A corrupted file is
    /// backed up next to the original and replaced by defaults.
    pub async fn load(&self) -> Result<ConfigFile, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {:?}, starting empty", self.path);
                return Ok(ConfigFile::default());
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        match serde_json::from_str::<ConfigFile>(&contents) {
            Ok(config) => {
                if config.version > CONFIG_VERSION {
                    return Err(StorageError::VersionTooNew {
                        found: config.version,
                        supported: CONFIG_VERSION,
                    });
                }
                tracing::info!(
                    "Loaded {} connection(s) and {} history entries from {:?}",
                    config.connections.len(),
                    config.command_history.len(),
                    self.path
                );
                Ok(config)
            }
            Err(e) => {
                tracing::warn!("Config file corrupted: {}", e);

                match self.backup().await {
                    Ok(backup_path) => {
                        tracing::warn!(
                            "Corrupted config backed up to {:?}, using defaults",
                            backup_path
                        );
                    }
                    Err(backup_err) => {
                        tracing::error!("Failed to backup corrupted config: {}", backup_err);
                    }
                }

                Ok(ConfigFile::default())
            }
        }
    }

    /// Save configuration to disk
    pub async fn save(&self, config: &ConfigFile) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        // Write to temp file first, then rename (atomic write)
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(config)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        restrict_permissions(&temp_path).await?;
        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    /// Check if config file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Get config file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a backup of the current config
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if self.exists().await {
            fs::copy(&self.path, &backup_path).await?;
        }

        Ok(backup_path)
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Connection;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("test.json"));

        let config = storage.load().await.unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert!(config.connections.is_empty());
        assert!(config.command_history.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("nested").join("test.json"));

        let mut config = ConfigFile::default();
        config
            .connections
            .push(Connection::new("db1", "10.0.0.5", "ops", 22).with_key_path("~/.ssh/db"));
        config.command_history = vec!["uptime".to_string(), "df -h".to_string()];

        storage.save(&config).await.unwrap();

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, config);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let path = temp.path().join("test.json");
        let storage = ConfigStorage::with_path(path.clone());
        storage.save(&ConfigFile::default()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupted_file_is_backed_up() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("test.json");
        std::fs::write(&path, "{ not json").unwrap();
        let storage = ConfigStorage::with_path(path);

        let config = storage.load().await.unwrap();
        assert!(config.connections.is_empty());

        let backups = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".backup."))
            .count();
        assert_eq!(backups, 1);
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("test.json");
        std::fs::write(&path, r#"{"version": 99, "connections": []}"#).unwrap();
        let storage = ConfigStorage::with_path(path);

        assert!(matches!(
            storage.load().await,
            Err(StorageError::VersionTooNew { found: 99, .. })
        ));
    }
}
