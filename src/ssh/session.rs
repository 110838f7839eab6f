//! SSH Session management
//!
//! [`SessionHandle`] is the live connection to one remote host. It is built by
//! resolving credentials and handing them to a [`Dialer`]; afterwards every
//! operation goes through the [`RemoteTransport`] it wraps.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::error::SshError;
use crate::config::Connection;
use crate::session::auth::{AuthResolver, Credential};

/// Command used to check a connection
const LIVENESS_PROBE: &str = "echo ping";

/// Captured result of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// An established connection able to run commands
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Run `command` on a fresh channel; non-zero exit is not an error
    async fn exec(&self, command: &str, env: &[(String, String)]) -> Result<RemoteOutput, SshError>;

    /// Close the connection; closing twice is harmless
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens transports from a connection and its ordered credentials
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Try `credentials` in order until one is accepted
    async fn dial(
        &self,
        connection: &Connection,
        credentials: Vec<Credential>,
    ) -> Result<Arc<dyn RemoteTransport>, SshError>;
}

/// A handle to an active SSH session
#[derive(Clone)]
pub struct SessionHandle {
    address: String,
    transport: Arc<dyn RemoteTransport>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("address", &self.address)
            .field("closed", &self.transport.is_closed())
            .finish()
    }
}

impl SessionHandle {
    pub fn new(address: String, transport: Arc<dyn RemoteTransport>) -> Self {
        Self { address, transport }
    }

    /// Resolve credentials for `connection` and dial it
    ///
    /// Fails with [`SshError::NoCredentials`] when nothing usable was found,
    /// otherwise with whatever the dialer reports.
    pub async fn connect(
        dialer: &dyn Dialer,
        resolver: &AuthResolver,
        connection: &Connection,
    ) -> Result<Self, SshError> {
        let credentials = resolver
            .resolve(&connection.host, connection.key_path.as_deref())
            .await?;

        info!(
            "Connecting to {}@{} with {} credential(s)",
            connection.user,
            connection.address(),
            credentials.len()
        );

        let transport = dialer.dial(connection, credentials).await?;
        Ok(Self::new(connection.address(), transport))
    }

    /// Probe the connection with a no-op command
    pub async fn is_alive(&self) -> Result<(), SshError> {
        let output = self.transport.exec(LIVENESS_PROBE, &[]).await?;
        debug!(
            "Liveness check on {} exited with {}",
            self.address, output.exit_code
        );
        Ok(())
    }

    /// Run a command, passing `env` as best-effort environment hints
    pub async fn run(&self, command: &str, env: &[(String, String)]) -> Result<RemoteOutput, SshError> {
        self.transport.exec(command, env).await
    }

    pub async fn disconnect(&self) {
        debug!("Closing session to {}", self.address);
        self.transport.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}
