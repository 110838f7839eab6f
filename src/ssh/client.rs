//! SSH Client implementation using russh

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::known_hosts;
use russh::keys::ssh_key::HashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::agent::SshAgentClient;
use super::error::SshError;
use super::handle_owner::spawn_handle_owner_task;
use super::session::{Dialer, RemoteTransport};
use crate::config::{Connection, Settings};
use crate::session::auth::{Credential, CredentialKind};

/// Dials one connection and authenticates with an ordered credential list
pub struct SshClient {
    connection: Connection,
    connect_timeout: Duration,
    keepalive_interval: Duration,
}

impl SshClient {
    pub fn new(connection: Connection, connect_timeout: Duration, keepalive_interval: Duration) -> Self {
        Self {
            connection,
            connect_timeout,
            keepalive_interval,
        }
    }

    /// Connect to the SSH server and authenticate
    pub async fn connect(self, credentials: &[Credential]) -> Result<Handle<ClientHandler>, SshError> {
        let host = self.connection.host.clone();
        let port = self.connection.effective_port();

        info!("Connecting to SSH server at {}:{}", host, port);

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.keepalive_interval),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(host.clone(), port);

        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(Arc::new(ssh_config), (host.as_str(), port), handler),
        )
        .await
        .map_err(|_| SshError::Timeout("Connection timed out".to_string()))?
        .map_err(|e| match e {
            SshError::HostKeyRejected(_) => e,
            other => SshError::ConnectionFailed(other.to_string()),
        })?;

        debug!("SSH handshake completed");

        self.authenticate(&mut handle, credentials).await?;

        info!("SSH authentication successful");
        Ok(handle)
    }

    /// Offer each credential in order until the server accepts one
    async fn authenticate(
        &self,
        handle: &mut Handle<ClientHandler>,
        credentials: &[Credential],
    ) -> Result<(), SshError> {
        let user = self.connection.user.as_str();

        // Only consulted for RSA keys
        let rsa_hash = match handle.best_supported_rsa_hash().await {
            Ok(hash) => hash.flatten(),
            Err(e) => {
                debug!("Could not negotiate RSA hash, using default: {}", e);
                None
            }
        };

        let mut agent: Option<SshAgentClient> = None;
        let mut last_error: Option<SshError> = None;

        for credential in credentials {
            let attempt = match &credential.kind {
                CredentialKind::PrivateKey { path, key } => {
                    debug!("Trying key {:?} ({:?})", path, credential.source);
                    handle
                        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), rsa_hash))
                        .await
                        .map(|result| result.success())
                        .map_err(SshError::from)
                }
                CredentialKind::AgentIdentity { socket, public_key } => {
                    if agent.is_none() {
                        match SshAgentClient::connect(socket).await {
                            Ok(client) => agent = Some(client),
                            Err(e) => {
                                warn!("Skipping agent identity: {}", e);
                                last_error = Some(e);
                                continue;
                            }
                        }
                    }
                    match agent.as_mut() {
                        Some(client) => client.authenticate(handle, user, public_key, rsa_hash).await,
                        None => continue,
                    }
                }
            };

            match attempt {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("Credential rejected by server ({:?})", credential.source),
                Err(e) => {
                    warn!("Authentication attempt failed: {}", e);
                    last_error = Some(e);
                    if handle.is_closed() {
                        break;
                    }
                }
            }
        }

        Err(SshError::AuthenticationFailed(format!(
            "No credential was accepted by the server (tried {}){}",
            credentials.len(),
            last_error
                .map(|e| format!(". Last error: {}", e))
                .unwrap_or_default()
        )))
    }
}

/// Production [`Dialer`] backed by russh
#[derive(Debug, Clone)]
pub struct SshDialer {
    connect_timeout: Duration,
    keepalive_interval: Duration,
}

impl SshDialer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            keepalive_interval: Duration::from_secs(settings.keepalive_interval_secs),
        }
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(
        &self,
        connection: &Connection,
        credentials: Vec<Credential>,
    ) -> Result<Arc<dyn RemoteTransport>, SshError> {
        let handle = SshClient::new(connection.clone(), self.connect_timeout, self.keepalive_interval)
            .connect(&credentials)
            .await?;
        Ok(Arc::new(spawn_handle_owner_task(handle, connection.address())))
    }
}

/// Client handler for russh callbacks
///
/// Verifies server host keys against `~/.ssh/known_hosts` (or the file given
/// to [`ClientHandler::with_known_hosts`]): matching keys pass, unknown keys
/// are learned (trust on first use), changed keys are rejected.
pub struct ClientHandler {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            known_hosts: None,
        }
    }

    /// Use `path` instead of the user's known_hosts file
    pub fn with_known_hosts(host: String, port: u16, path: PathBuf) -> Self {
        Self {
            host,
            port,
            known_hosts: Some(path),
        }
    }

    fn check_known(&self, key: &PublicKey) -> Result<bool, russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => known_hosts::check_known_hosts_path(&self.host, self.port, key, path),
            None => known_hosts::check_known_hosts(&self.host, self.port, key),
        }
    }

    fn learn(&self, key: &PublicKey) -> Result<(), russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => known_hosts::learn_known_hosts_path(&self.host, self.port, key, path),
            None => known_hosts::learn_known_hosts(&self.host, self.port, key),
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);

        match self.check_known(server_public_key) {
            Ok(true) => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            Ok(false) => {
                info!(
                    "New host {}:{}, adding to known_hosts (fingerprint: {})",
                    self.host, self.port, fingerprint
                );
                if let Err(e) = self.learn(server_public_key) {
                    warn!("Failed to save host key: {}", e);
                }
                Ok(true)
            }
            Err(russh::keys::Error::KeyChanged { line }) => {
                warn!(
                    "HOST KEY CHANGED for {}:{} (known_hosts line {}), got {}",
                    self.host, self.port, line, fingerprint
                );
                Err(SshError::HostKeyRejected(format!(
                    "key for {}:{} differs from known_hosts line {} (got {})",
                    self.host, self.port, line, fingerprint
                )))
            }
            Err(e) => {
                warn!("Could not read known_hosts, accepting {}: {}", fingerprint, e);
                Ok(true)
            }
        }
    }
}
