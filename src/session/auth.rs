//! Credential Resolution
//!
//! Builds the ordered list of credentials offered when connecting to a host.
//! Each source is an independent producer; a failing source contributes
//! nothing and resolution only fails when every source came back empty.
//!
//! Order (never reordered afterwards):
//! 1. Identities held by the SSH agent (`SSH_AUTH_SOCK`)
//! 2. The connection's explicit key path
//! 3. `IdentityFile` entries of matching `Host` blocks in `~/.ssh/config`
//! 4. Default keys: `~/.ssh/id_rsa`, `~/.ssh/id_ed25519`, `~/.ssh/id_ecdsa`

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::{PrivateKey, PublicKey};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ssh_config::{identity_files_for, parse_ssh_config};
use crate::ssh::agent::{agent_socket_from_env, SshAgentClient};
use crate::ssh::SshError;

/// Where a credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CredentialSource {
    Agent,
    ExplicitPath,
    SshConfig,
    DefaultPath,
}

/// Authentication material for one attempt
#[derive(Clone)]
pub enum CredentialKind {
    /// Identity held by an agent; signing is delegated to it
    AgentIdentity { socket: PathBuf, public_key: PublicKey },
    /// Private key loaded from disk
    PrivateKey { path: PathBuf, key: Arc<PrivateKey> },
}

/// One resolved credential candidate
#[derive(Clone)]
pub struct Credential {
    pub source: CredentialSource,
    pub kind: CredentialKind,
}

impl Credential {
    /// Key file path, for disk-backed credentials
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            CredentialKind::PrivateKey { path, .. } => Some(path),
            CredentialKind::AgentIdentity { .. } => None,
        }
    }
}

// Never print key material
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CredentialKind::AgentIdentity { public_key, .. } => f
                .debug_struct("Credential")
                .field("source", &self.source)
                .field("agent_key", &public_key.comment())
                .finish(),
            CredentialKind::PrivateKey { path, .. } => f
                .debug_struct("Credential")
                .field("source", &self.source)
                .field("path", path)
                .finish(),
        }
    }
}

/// Errors that can occur while loading a single key file
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Failed to read key file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse key: {0}")]
    ParseError(String),
}

/// Environment the resolver searches
#[derive(Debug, Clone, Default)]
pub struct AuthEnvironment {
    /// Home directory used for `~` expansion and default key locations
    pub home: Option<PathBuf>,
    /// Agent socket; `None` skips the agent step
    pub agent_socket: Option<PathBuf>,
    /// SSH client config file
    pub ssh_config: Option<PathBuf>,
}

impl AuthEnvironment {
    /// Read the current process environment
    pub fn from_env() -> Self {
        let home = dirs::home_dir();
        let ssh_config = home.as_ref().map(|h| h.join(".ssh").join("config"));
        Self {
            home,
            agent_socket: agent_socket_from_env(),
            ssh_config,
        }
    }
}

/// Produces credential candidates for a host
#[derive(Debug, Clone)]
pub struct AuthResolver {
    env: AuthEnvironment,
}

impl AuthResolver {
    pub fn new(env: AuthEnvironment) -> Self {
        Self { env }
    }

    pub fn from_env() -> Self {
        Self::new(AuthEnvironment::from_env())
    }

    /// Resolve every usable credential for `host`, in priority order
    pub async fn resolve(
        &self,
        host: &str,
        explicit_key_path: Option<&str>,
    ) -> Result<Vec<Credential>, SshError> {
        let mut candidates = self.agent_candidates().await;
        candidates.extend(self.explicit_candidates(explicit_key_path).await);
        candidates.extend(self.ssh_config_candidates(host).await);
        candidates.extend(self.default_candidates().await);

        if candidates.is_empty() {
            info!("No usable credentials for {}", host);
            return Err(SshError::NoCredentials {
                host: host.to_string(),
            });
        }

        debug!("Resolved {} credential(s) for {}", candidates.len(), host);
        Ok(candidates)
    }

    async fn agent_candidates(&self) -> Vec<Credential> {
        let Some(socket) = self.env.agent_socket.as_ref() else {
            return Vec::new();
        };

        let identities = match SshAgentClient::connect(socket).await {
            Ok(mut agent) => agent.identities().await,
            Err(e) => Err(e),
        };

        match identities {
            Ok(keys) => keys
                .into_iter()
                .map(|public_key| Credential {
                    source: CredentialSource::Agent,
                    kind: CredentialKind::AgentIdentity {
                        socket: socket.clone(),
                        public_key,
                    },
                })
                .collect(),
            Err(e) => {
                debug!("Skipping agent identities: {}", e);
                Vec::new()
            }
        }
    }

    async fn explicit_candidates(&self, key_path: Option<&str>) -> Vec<Credential> {
        match key_path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) => self
                .load_candidate(path, CredentialSource::ExplicitPath)
                .await
                .into_iter()
                .collect(),
            None => Vec::new(),
        }
    }

    async fn ssh_config_candidates(&self, host: &str) -> Vec<Credential> {
        let Some(config_path) = self.env.ssh_config.as_ref() else {
            return Vec::new();
        };

        let blocks = match parse_ssh_config(config_path).await {
            Ok(blocks) => blocks,
            Err(e) => {
                debug!("Skipping ssh config {:?}: {}", config_path, e);
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        for path in identity_files_for(&blocks, host) {
            candidates.extend(self.load_candidate(&path, CredentialSource::SshConfig).await);
        }
        candidates
    }

    async fn default_candidates(&self) -> Vec<Credential> {
        let mut candidates = Vec::new();
        for path in default_key_paths(self.env.home.as_deref()) {
            if path.exists() {
                candidates.extend(self.load_candidate_path(path, CredentialSource::DefaultPath).await);
            }
        }
        candidates
    }

    async fn load_candidate(&self, path: &str, source: CredentialSource) -> Option<Credential> {
        let path = expand_tilde(Path::new(path), self.env.home.as_deref());
        self.load_candidate_path(path, source).await
    }

    async fn load_candidate_path(
        &self,
        path: PathBuf,
        source: CredentialSource,
    ) -> Option<Credential> {
        match load_private_key(&path).await {
            Ok(key) => {
                debug!("Loaded {:?} key from {:?}", source, path);
                Some(Credential {
                    source,
                    kind: CredentialKind::PrivateKey {
                        path,
                        key: Arc::new(key),
                    },
                })
            }
            Err(e) => {
                debug!("Skipping key {:?}: {}", path, e);
                None
            }
        }
    }
}

/// Load an unencrypted private key from file
pub async fn load_private_key(path: &Path) -> Result<PrivateKey, KeyError> {
    let key_data = tokio::fs::read_to_string(path).await?;
    russh::keys::decode_secret_key(&key_data, None).map_err(|e| KeyError::ParseError(e.to_string()))
}

/// Default key locations under `home`
pub fn default_key_paths(home: Option<&Path>) -> Vec<PathBuf> {
    let Some(home) = home else {
        return Vec::new();
    };
    let ssh_dir = home.join(".ssh");

    vec![
        ssh_dir.join("id_rsa"),
        ssh_dir.join("id_ed25519"),
        ssh_dir.join("id_ecdsa"),
    ]
}

/// Expand a leading `~` against `home`
pub fn expand_tilde(path: &Path, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    let path_str = path.to_string_lossy();

    if let Some(stripped) = path_str.strip_prefix("~/") {
        return home.join(stripped);
    } else if path_str == "~" {
        return home.to_path_buf();
    }

    path.to_path_buf()
}
