//! Command Executor
//!
//! Runs one command on a connected session and packages the result as a
//! [`CommandExecution`]. A non-zero exit status is data, not an error; only a
//! transport failure produces [`ExecutionError`].

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use super::types::{CommandExecution, ConnectionId, ConnectionState};
use crate::config::Settings;
use crate::ssh::{SessionHandle, SshError};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Connection is not connected")]
    NotConnected,

    #[error("A command is already running on this connection")]
    AlreadyExecuting,

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Transport error: {0}")]
    Transport(#[from] SshError),
}

/// Local precondition check; never touches the network
pub fn check_preconditions(state: &ConnectionState) -> Result<(), ExecutionError> {
    if !state.is_connected() || state.session.is_none() {
        return Err(ExecutionError::NotConnected);
    }
    if state.is_executing() {
        return Err(ExecutionError::AlreadyExecuting);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Locale hints requested on every channel
    env: Vec<(String, String)>,
}

impl CommandExecutor {
    pub fn new(locale: &str) -> Self {
        Self {
            env: vec![
                ("LANG".to_string(), locale.to_string()),
                ("LC_ALL".to_string(), locale.to_string()),
            ],
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.locale)
    }

    /// Run the command of a pending `execution` and complete it
    ///
    /// `submitted_at` is kept from the pending record; `duration` covers the
    /// remote run only.
    pub async fn run(
        &self,
        session: &SessionHandle,
        execution: CommandExecution,
    ) -> Result<CommandExecution, ExecutionError> {
        let command = execution.command.as_str();
        let started = Instant::now();

        debug!("Running {:?} on {}", command, session.address());

        match session.run(command, &self.env).await {
            Ok(output) => {
                let elapsed = started.elapsed();
                debug!(
                    "{:?} on {} exited with {} after {:?}",
                    command,
                    session.address(),
                    output.exit_code,
                    elapsed
                );
                Ok(execution.complete(output, elapsed))
            }
            Err(e) => {
                warn!("{:?} on {} failed: {}", command, session.address(), e);
                Err(ExecutionError::Transport(e))
            }
        }
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
