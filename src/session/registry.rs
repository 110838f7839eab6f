//! Connection Registry
//!
//! Owns every configured connection together with its runtime state and the
//! current selection. It is a plain value owned by the coordinator; results of
//! asynchronous work are applied to it through the `finish_*` methods, which
//! discard results that no longer belong to the connection's current attempt.

use chrono::Local;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::executor::{check_preconditions, ExecutionError};
use super::types::{CommandExecution, ConnectionId, ConnectionState, ConnectionStatus};
use crate::config::Connection;
use crate::ssh::{SessionHandle, SshError};

/// Work handed out by [`ConnectionRegistry::begin_connect`]
#[derive(Debug, Clone)]
pub struct ConnectTicket {
    pub id: ConnectionId,
    pub attempt: u64,
    pub connection: Connection,
}

/// Work handed out by [`ConnectionRegistry::begin_execution`]
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub id: ConnectionId,
    pub run: u64,
    pub session: SessionHandle,
    /// The pending record stored as `current`, to be completed by the executor
    pub execution: CommandExecution,
}

/// Result of applying a finished connect attempt
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected,
    Failed(String),
    /// The attempt was superseded; the returned session must be closed
    Stale(Option<SessionHandle>),
}

/// Result of applying a finished command run
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Appended to the log; status is untouched
    Appended,
    /// Transport failure; `session` is the torn-down handle to close, if any
    Failed {
        cause: String,
        session: Option<SessionHandle>,
    },
    /// The connection no longer exists
    Ignored,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Insertion order is display order
    entries: Vec<ConnectionState>,
    selected: Option<usize>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection in `Disconnected` state; the first one added becomes selected
    pub fn add(&mut self, connection: Connection) -> ConnectionId {
        let state = ConnectionState::new(connection);
        let id = state.id;
        info!(
            "Adding connection {} ({}@{})",
            id,
            state.connection.user,
            state.connection.address()
        );
        self.entries.push(state);
        if self.selected.is_none() {
            self.selected = Some(0);
        }
        id
    }

    /// Remove a connection, returning its state so the caller can close its session
    pub fn remove(&mut self, id: ConnectionId) -> Result<ConnectionState, RegistryError> {
        let index = self.index_of(id)?;
        let mut state = self.entries.remove(index);
        state.attempt += 1;

        self.selected = match self.selected {
            _ if self.entries.is_empty() => None,
            Some(sel) if sel > index || sel >= self.entries.len() => Some(sel - 1),
            other => other,
        };

        info!("Removed connection {} ({})", id, state.connection.alias);
        Ok(state)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionState> {
        self.entries.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionState> {
        self.entries.iter_mut().find(|s| s.id == id)
    }

    fn index_of(&self, id: ConnectionId) -> Result<usize, RegistryError> {
        self.entries
            .iter()
            .position(|s| s.id == id)
            .ok_or(RegistryError::UnknownConnection(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionState> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Connection definitions in display order, as persisted
    pub fn connections(&self) -> Vec<Connection> {
        self.entries.iter().map(|s| s.connection.clone()).collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Selection
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn select(&mut self, id: ConnectionId) -> Result<(), RegistryError> {
        self.selected = Some(self.index_of(id)?);
        Ok(())
    }

    pub fn select_next(&mut self) -> Option<ConnectionId> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }
        let next = self.selected.map_or(0, |i| (i + 1) % len);
        self.selected = Some(next);
        Some(self.entries[next].id)
    }

    pub fn select_previous(&mut self) -> Option<ConnectionId> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }
        let prev = self.selected.map_or(len - 1, |i| (i + len - 1) % len);
        self.selected = Some(prev);
        Some(self.entries[prev].id)
    }

    pub fn selected(&self) -> Option<&ConnectionState> {
        self.selected.and_then(|i| self.entries.get(i))
    }

    pub fn selected_id(&self) -> Option<ConnectionId> {
        self.selected().map(|s| s.id)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Connect lifecycle
    // ═══════════════════════════════════════════════════════════════════════════

    /// Enter `Connecting`
    ///
    /// Returns `Ok(None)` when the connection is already connecting or
    /// connected; nothing changes in that case.
    pub fn begin_connect(&mut self, id: ConnectionId) -> Result<Option<ConnectTicket>, RegistryError> {
        let state = self
            .get_mut(id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        if !state.status.can_connect() {
            debug!("Ignoring connect for {}: already {}", id, state.status);
            return Ok(None);
        }

        state.status = ConnectionStatus::Connecting;
        state.last_error = None;
        state.attempt += 1;

        Ok(Some(ConnectTicket {
            id,
            attempt: state.attempt,
            connection: state.connection.clone(),
        }))
    }

    /// Apply the result of a connect attempt
    pub fn finish_connect(
        &mut self,
        id: ConnectionId,
        attempt: u64,
        result: Result<SessionHandle, SshError>,
    ) -> ConnectOutcome {
        let Some(state) = self.get_mut(id) else {
            debug!("Connect result for removed connection {}", id);
            return ConnectOutcome::Stale(result.ok());
        };

        if state.attempt != attempt || state.status != ConnectionStatus::Connecting {
            debug!(
                "Discarding stale connect result for {} (attempt {}, current {})",
                id, attempt, state.attempt
            );
            return ConnectOutcome::Stale(result.ok());
        }

        match result {
            Ok(session) => {
                info!("Connection {} connected to {}", id, session.address());
                state.status = ConnectionStatus::Connected;
                state.last_active = Some(Local::now());
                state.last_error = None;
                state.session = Some(session);
                ConnectOutcome::Connected
            }
            Err(e) => {
                let cause = e.to_string();
                warn!("Connection {} failed: {}", id, cause);
                state.status = ConnectionStatus::Error;
                state.last_error = Some(cause.clone());
                ConnectOutcome::Failed(cause)
            }
        }
    }

    /// Enter `Disconnected` from any state; returns the session to close
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<Option<SessionHandle>, RegistryError> {
        let state = self
            .get_mut(id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        state.attempt += 1;
        state.status = ConnectionStatus::Disconnected;
        state.last_error = None;
        state.current = None;
        Ok(state.session.take())
    }

    /// Move a connected session to `Error` after a failed liveness check
    ///
    /// Only applies when `attempt` is still current. Returns the session to close.
    pub fn mark_failed(&mut self, id: ConnectionId, attempt: u64, cause: String) -> Option<SessionHandle> {
        let state = self.get_mut(id)?;
        if state.attempt != attempt || state.status != ConnectionStatus::Connected {
            return None;
        }
        warn!("Connection {} lost: {}", id, cause);
        state.status = ConnectionStatus::Error;
        state.last_error = Some(cause);
        state.current = None;
        state.session.take()
    }

    /// Session and attempt of a connected connection, for liveness checks
    pub fn live_session(&self, id: ConnectionId) -> Result<(SessionHandle, u64), ExecutionError> {
        let state = self.get(id).ok_or(ExecutionError::UnknownConnection(id))?;
        match (&state.session, state.status) {
            (Some(session), ConnectionStatus::Connected) => Ok((session.clone(), state.attempt)),
            _ => Err(ExecutionError::NotConnected),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Execution lifecycle
    // ═══════════════════════════════════════════════════════════════════════════

    /// Mark a command as in flight after checking local preconditions
    pub fn begin_execution(&mut self, id: ConnectionId, command: &str) -> Result<RunTicket, ExecutionError> {
        let state = self
            .get_mut(id)
            .ok_or(ExecutionError::UnknownConnection(id))?;
        check_preconditions(state)?;

        let session = state.session.clone().ok_or(ExecutionError::NotConnected)?;
        let execution = CommandExecution::pending(command);
        state.run += 1;
        state.current = Some(execution.clone());

        Ok(RunTicket {
            id,
            run: state.run,
            session,
            execution,
        })
    }

    /// Apply the result of a command run
    ///
    /// A completed execution is appended even if the connection was
    /// disconnected meanwhile; only the in-flight run may change status.
    pub fn finish_execution(
        &mut self,
        id: ConnectionId,
        run: u64,
        result: Result<CommandExecution, ExecutionError>,
    ) -> ExecutionOutcome {
        let Some(state) = self.get_mut(id) else {
            return ExecutionOutcome::Ignored;
        };

        let in_flight = state.run == run && state.current.is_some();
        if in_flight {
            state.current = None;
        }

        match result {
            Ok(execution) => {
                state.executions.push(execution);
                state.last_active = Some(Local::now());
                ExecutionOutcome::Appended
            }
            Err(e) => {
                let cause = e.to_string();
                let session = if in_flight && state.status == ConnectionStatus::Connected {
                    warn!("Connection {} failed during command: {}", id, cause);
                    state.status = ConnectionStatus::Error;
                    state.last_error = Some(cause.clone());
                    state.session.take()
                } else {
                    None
                };
                ExecutionOutcome::Failed { cause, session }
            }
        }
    }

    pub fn status_string(&self, id: ConnectionId) -> Option<String> {
        self.get(id).map(ConnectionState::status_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::ssh::fakes::ScriptedTransport;
    use crate::ssh::RemoteOutput;

    fn db1() -> Connection {
        Connection::new("db1", "10.0.0.5", "ops", 22)
    }

    fn session() -> SessionHandle {
        SessionHandle::new("10.0.0.5:22".to_string(), Arc::new(ScriptedTransport::default()))
    }

    fn connected(registry: &mut ConnectionRegistry) -> ConnectionId {
        let id = registry.add(db1());
        let ticket = registry.begin_connect(id).unwrap().unwrap();
        assert!(matches!(
            registry.finish_connect(id, ticket.attempt, Ok(session())),
            ConnectOutcome::Connected
        ));
        id
    }

    fn finished(command: &str, exit_code: i32) -> CommandExecution {
        CommandExecution::pending(command).complete(
            RemoteOutput {
                stdout: "out\n".to_string(),
                stderr: String::new(),
                exit_code,
            },
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_connect_success() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.add(db1());
        assert_eq!(registry.get(id).unwrap().status, ConnectionStatus::Disconnected);

        let ticket = registry.begin_connect(id).unwrap().unwrap();
        assert_eq!(registry.get(id).unwrap().status, ConnectionStatus::Connecting);

        registry.finish_connect(id, ticket.attempt, Ok(session()));
        let state = registry.get(id).unwrap();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert!(state.last_active.is_some());
        assert!(state.last_error.is_none());
        assert!(state.session().is_some());
    }

    #[test]
    fn test_second_connect_is_noop() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.add(db1());
        let ticket = registry.begin_connect(id).unwrap().unwrap();

        assert!(registry.begin_connect(id).unwrap().is_none());
        assert_eq!(registry.get(id).unwrap().attempt, ticket.attempt);

        registry.finish_connect(id, ticket.attempt, Ok(session()));
        assert!(registry.begin_connect(id).unwrap().is_none());
        assert_eq!(registry.get(id).unwrap().status, ConnectionStatus::Connected);
    }

    #[test]
    fn test_connect_failure_then_retry() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.add(db1());
        let ticket = registry.begin_connect(id).unwrap().unwrap();

        let outcome = registry.finish_connect(
            id,
            ticket.attempt,
            Err(SshError::NoCredentials {
                host: "10.0.0.5".to_string(),
            }),
        );
        assert!(matches!(outcome, ConnectOutcome::Failed(_)));
        assert_eq!(registry.get(id).unwrap().status, ConnectionStatus::Error);
        assert!(registry
            .status_string(id)
            .unwrap()
            .starts_with("error: No usable credentials"));

        let retry = registry.begin_connect(id).unwrap().unwrap();
        assert!(retry.attempt > ticket.attempt);
        assert!(registry.get(id).unwrap().last_error.is_none());
    }

    #[test]
    fn test_result_after_disconnect_is_stale() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.add(db1());
        let ticket = registry.begin_connect(id).unwrap().unwrap();

        assert!(registry.disconnect(id).unwrap().is_none());
        let outcome = registry.finish_connect(id, ticket.attempt, Ok(session()));

        assert!(matches!(outcome, ConnectOutcome::Stale(Some(_))));
        assert_eq!(registry.get(id).unwrap().status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let id = connected(&mut registry);

        assert!(registry.disconnect(id).unwrap().is_some());
        assert!(registry.disconnect(id).unwrap().is_none());
        assert_eq!(registry.get(id).unwrap().status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_execution_requires_connection() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.add(db1());

        assert!(matches!(
            registry.begin_execution(id, "uptime"),
            Err(ExecutionError::NotConnected)
        ));
        assert_eq!(registry.get(id).unwrap().status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_one_command_at_a_time() {
        let mut registry = ConnectionRegistry::new();
        let id = connected(&mut registry);

        let ticket = registry.begin_execution(id, "sleep 1").unwrap();
        assert!(matches!(
            registry.begin_execution(id, "uptime"),
            Err(ExecutionError::AlreadyExecuting)
        ));

        let outcome = registry.finish_execution(id, ticket.run, Ok(finished("sleep 1", 0)));
        assert!(matches!(outcome, ExecutionOutcome::Appended));

        let state = registry.get(id).unwrap();
        assert!(state.current.is_none());
        assert_eq!(state.executions.len(), 1);
        assert!(registry.begin_execution(id, "uptime").is_ok());
    }

    #[test]
    fn test_ticket_carries_current_record() {
        let mut registry = ConnectionRegistry::new();
        let id = connected(&mut registry);
        let ticket = registry.begin_execution(id, "uptime").unwrap();

        let state = registry.get(id).unwrap();
        assert_eq!(state.current.as_ref(), Some(&ticket.execution));
        assert_eq!(ticket.execution.command, "uptime");
        assert!(!ticket.execution.completed);
    }

    #[test]
    fn test_non_zero_exit_keeps_status() {
        let mut registry = ConnectionRegistry::new();
        let id = connected(&mut registry);
        let ticket = registry.begin_execution(id, "false").unwrap();

        registry.finish_execution(id, ticket.run, Ok(finished("false", 1)));

        let state = registry.get(id).unwrap();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.executions[0].exit_code, 1);
    }

    #[test]
    fn test_transport_failure_moves_to_error() {
        let mut registry = ConnectionRegistry::new();
        let id = connected(&mut registry);
        let ticket = registry.begin_execution(id, "uptime").unwrap();

        let outcome = registry.finish_execution(
            id,
            ticket.run,
            Err(ExecutionError::Transport(SshError::Disconnected)),
        );

        assert!(matches!(outcome, ExecutionOutcome::Failed { session: Some(_), .. }));
        let state = registry.get(id).unwrap();
        assert_eq!(state.status, ConnectionStatus::Error);
        assert!(state.executions.is_empty());
        assert!(state.current.is_none());
        assert!(state.session().is_none());
    }

    #[test]
    fn test_completed_run_after_disconnect_is_appended() {
        let mut registry = ConnectionRegistry::new();
        let id = connected(&mut registry);
        let ticket = registry.begin_execution(id, "uptime").unwrap();
        registry.disconnect(id).unwrap();

        registry.finish_execution(id, ticket.run, Ok(finished("uptime", 0)));

        let state = registry.get(id).unwrap();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.executions.len(), 1);
    }

    #[test]
    fn test_liveness_failure_marks_error() {
        let mut registry = ConnectionRegistry::new();
        let id = connected(&mut registry);
        let (_, attempt) = registry.live_session(id).unwrap();

        assert!(registry.mark_failed(id, attempt + 1, "stale".to_string()).is_none());
        assert_eq!(registry.get(id).unwrap().status, ConnectionStatus::Connected);

        assert!(registry.mark_failed(id, attempt, "Disconnected".to_string()).is_some());
        assert_eq!(registry.get(id).unwrap().status, ConnectionStatus::Error);
    }

    #[test]
    fn test_selection_wraps() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.select_next().is_none());

        let a = registry.add(Connection::new("a", "a.example.com", "u", 22));
        let b = registry.add(Connection::new("b", "b.example.com", "u", 22));
        let c = registry.add(Connection::new("c", "c.example.com", "u", 22));
        assert_eq!(registry.selected_id(), Some(a));

        assert_eq!(registry.select_next(), Some(b));
        assert_eq!(registry.select_next(), Some(c));
        assert_eq!(registry.select_next(), Some(a));
        assert_eq!(registry.select_previous(), Some(c));

        registry.select(b).unwrap();
        assert_eq!(registry.selected_id(), Some(b));
    }

    #[test]
    fn test_remove_keeps_selection_in_range() {
        let mut registry = ConnectionRegistry::new();
        let a = registry.add(Connection::new("a", "a.example.com", "u", 22));
        let b = registry.add(Connection::new("b", "b.example.com", "u", 22));
        registry.select(b).unwrap();

        registry.remove(b).unwrap();
        assert_eq!(registry.selected_id(), Some(a));

        registry.remove(a).unwrap();
        assert_eq!(registry.selected_id(), None);
        assert!(matches!(
            registry.remove(a),
            Err(RegistryError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_remove_before_selection_shifts_index() {
        let mut registry = ConnectionRegistry::new();
        let a = registry.add(Connection::new("a", "a.example.com", "u", 22));
        registry.add(Connection::new("b", "b.example.com", "u", 22));
        let c = registry.add(Connection::new("c", "c.example.com", "u", 22));
        registry.select(c).unwrap();

        registry.remove(a).unwrap();
        assert_eq!(registry.selected_id(), Some(c));
    }
}
