//! Coordinator Event System
//!
//! [`Event`]s are completion messages sent by dispatched tasks back to the
//! coordinator. [`Update`]s describe what applying one of them changed, for
//! whatever front end is driving the coordinator.

use serde::Serialize;

use crate::session::{CommandExecution, ConnectionId, ConnectionStatus, ExecutionError};
use crate::ssh::{SessionHandle, SshError};

/// Completion message from a dispatched task
#[derive(Debug)]
pub enum Event {
    ConnectFinished {
        id: ConnectionId,
        attempt: u64,
        result: Result<SessionHandle, SshError>,
    },
    CommandFinished {
        id: ConnectionId,
        run: u64,
        result: Result<CommandExecution, ExecutionError>,
    },
    LivenessChecked {
        id: ConnectionId,
        attempt: u64,
        result: Result<(), SshError>,
    },
}

impl Event {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::ConnectFinished { id, .. }
            | Self::CommandFinished { id, .. }
            | Self::LivenessChecked { id, .. } => *id,
        }
    }
}

/// State change produced by [`Coordinator::apply`](super::Coordinator::apply)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Update {
    StatusChanged {
        connection_id: ConnectionId,
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ExecutionAppended {
        connection_id: ConnectionId,
        command: String,
        exit_code: i32,
    },
    ExecutionFailed {
        connection_id: ConnectionId,
        error: String,
    },
    Liveness {
        connection_id: ConnectionId,
        alive: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Result of a superseded attempt, or for a removed connection
    Ignored { connection_id: ConnectionId },
}
