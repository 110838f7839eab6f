//! Session Types and Data Structures

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Connection;
use crate::ssh::{RemoteOutput, SessionHandle};

/// Runtime identifier of a configured connection
///
/// Assigned when the connection is added to the registry; not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    /// A connect request is accepted only from these states
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One command run against a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExecution {
    pub command: String,
    pub submitted_at: DateTime<Local>,
    pub completed: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandExecution {
    /// Incomplete record for a command that was just dispatched
    pub fn pending(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            submitted_at: Local::now(),
            completed: false,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Finish the record with the captured output
    pub fn complete(self, output: RemoteOutput, duration: Duration) -> Self {
        Self {
            completed: true,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
            ..self
        }
    }
}

/// Runtime state of one configured connection
///
/// Only [`ConnectionRegistry`](super::registry::ConnectionRegistry) mutates it.
#[derive(Debug)]
pub struct ConnectionState {
    pub id: ConnectionId,
    pub connection: Connection,
    pub status: ConnectionStatus,
    pub last_active: Option<DateTime<Local>>,
    /// Present only while `status == Error`
    pub last_error: Option<String>,
    /// Completed executions, oldest first
    pub executions: Vec<CommandExecution>,
    /// In-flight command, only while connected
    pub current: Option<CommandExecution>,
    pub(crate) session: Option<SessionHandle>,
    /// Bumped on every connect and disconnect; stale results carry an old value
    pub(crate) attempt: u64,
    /// Bumped on every dispatched command
    pub(crate) run: u64,
}

impl ConnectionState {
    pub fn new(connection: Connection) -> Self {
        Self {
            id: ConnectionId::new(),
            connection,
            status: ConnectionStatus::Disconnected,
            last_active: None,
            last_error: None,
            executions: Vec::new(),
            current: None,
            session: None,
            attempt: 0,
            run: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_executing(&self) -> bool {
        self.current.is_some()
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Status line shown to the operator
    pub fn status_string(&self) -> String {
        match (self.status, &self.last_error) {
            (ConnectionStatus::Error, Some(cause)) => format!("error: {}", cause),
            (status, _) => status.to_string(),
        }
    }
}
