//! SSH Agent Client
//!
//! Talks to the agent named by `SSH_AUTH_SOCK`: lists the identities it holds
//! and signs authentication challenges on their behalf.
//!
//! # Authentication Flow
//! 1. Connect to the agent socket
//! 2. Request identity list from agent ([`AgentClient::request_identities`])
//! 3. For a chosen identity, call [`Handle::authenticate_publickey_with`] with [`AgentSigner`]
//! 4. Server sends a sign request, russh calls [`Signer::auth_publickey_sign`],
//!    the agent signs and the response completes auth

use std::future::Future;
use std::path::Path;

use russh::client::Handle;
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::ssh_key::{self, HashAlg, PublicKey};
use russh::{AgentAuthError, CryptoVec, Signer};
use tracing::{debug, info};

use crate::ssh::client::ClientHandler;
use crate::ssh::error::SshError;

type DynAgent = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// Send-safe wrapper around [`AgentClient`] implementing the [`Signer`] trait.
///
/// russh's own `impl Signer for AgentClient` borrows the `PublicKey` from the
/// sign request across an `.await`, which keeps the enclosing future from being
/// `Send`. Cloning the key before the async block avoids that.
struct AgentSigner<'a> {
    agent: &'a mut DynAgent,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key_owned = key.clone();
        async move {
            self.agent
                .sign_request(&key_owned, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

/// SSH Agent client wrapper
pub struct SshAgentClient {
    agent: DynAgent,
}

impl SshAgentClient {
    /// Connect to the agent listening on `socket`
    #[cfg(unix)]
    pub async fn connect(socket: &Path) -> Result<Self, SshError> {
        debug!("Connecting to SSH Agent at {:?}", socket);

        let agent = AgentClient::connect_uds(socket).await.map_err(|e| {
            SshError::AgentNotAvailable(format!(
                "Failed to connect to SSH Agent at {}: {}",
                socket.display(),
                e
            ))
        })?;

        Ok(Self {
            agent: agent.dynamic(),
        })
    }

    #[cfg(not(unix))]
    pub async fn connect(_socket: &Path) -> Result<Self, SshError> {
        Err(SshError::AgentNotAvailable(
            "Unix socket agents are not supported on this platform".to_string(),
        ))
    }

    /// List the public keys held by the agent
    pub async fn identities(&mut self) -> Result<Vec<PublicKey>, SshError> {
        let keys = self
            .agent
            .request_identities()
            .await
            .map_err(|e| SshError::AgentError(format!("Failed to list agent keys: {}", e)))?;

        debug!("SSH Agent reports {} key(s)", keys.len());
        Ok(keys)
    }

    /// Offer one agent-held identity to the server
    ///
    /// Returns `Ok(false)` when the server rejects the key.
    pub async fn authenticate(
        &mut self,
        handle: &mut Handle<ClientHandler>,
        username: &str,
        key: &PublicKey,
        hash_alg: Option<HashAlg>,
    ) -> Result<bool, SshError> {
        debug!("Trying agent key: {} ({})", key.algorithm(), key.comment());

        let result = handle
            .authenticate_publickey_with(
                username,
                key.clone(),
                hash_alg,
                &mut AgentSigner {
                    agent: &mut self.agent,
                },
            )
            .await
            .map_err(|e| SshError::AgentError(format!("Agent signing failed: {}", e)))?;

        if result.success() {
            info!("SSH Agent authentication succeeded with key: {}", key.comment());
        }
        Ok(result.success())
    }
}

/// Agent socket advertised by the environment, if any
pub fn agent_socket_from_env() -> Option<std::path::PathBuf> {
    std::env::var_os("SSH_AUTH_SOCK")
        .filter(|s| !s.is_empty())
        .map(std::path::PathBuf::from)
}
