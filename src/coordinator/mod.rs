//! Coordinator
//!
//! The single owner of all connection state. Network work (connect, command
//! runs, liveness checks) is spawned onto tokio tasks; each task reports back
//! with one [`Event`] on the coordinator's channel and never touches state
//! itself. The front end loops on [`Coordinator::next_event`] and
//! [`Coordinator::apply`], so every mutation happens on the coordinator's task
//! in the order results arrive.
//!
//! # Cancellation
//!
//! In-flight connects and command runs cannot be cancelled. `disconnect`
//! detaches the connection immediately, but the spawned task still runs to
//! completion; its result is then discarded (connect, liveness) or appended
//! without changing status (a completed command).

pub mod events;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use events::{Event, Update};

use crate::config::{ConfigFile, ConfigStorage, NewConnection, Settings, StorageError, CONFIG_VERSION};
use crate::session::{
    render_transcript, AuthResolver, CommandExecutor, ConnectOutcome, ConnectionId, ConnectionRegistry,
    ConnectionState, ConnectionStatus, ExecutionError, ExecutionOutcome, HistoryCursor, HistoryLog,
    RegistryError, ScrollbackModel, TranscriptLine,
};
use crate::ssh::{Dialer, SessionHandle, SshDialer};

/// Capacity of the completion channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct Coordinator {
    registry: ConnectionRegistry,
    history: HistoryLog,
    cursor: HistoryCursor,
    scroll: ScrollbackModel,
    settings: Settings,
    storage: ConfigStorage,
    resolver: Arc<AuthResolver>,
    dialer: Arc<dyn Dialer>,
    executor: Arc<CommandExecutor>,
    event_tx: mpsc::Sender<Event>,
    event_rx: mpsc::Receiver<Event>,
}

impl Coordinator {
    pub fn new(
        storage: ConfigStorage,
        config: ConfigFile,
        resolver: AuthResolver,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut registry = ConnectionRegistry::new();
        for connection in config.connections {
            registry.add(connection);
        }

        let history = HistoryLog::from_entries(config.command_history, config.settings.history_limit);

        Self {
            registry,
            history,
            cursor: HistoryCursor::default(),
            scroll: ScrollbackModel::new(),
            executor: Arc::new(CommandExecutor::from_settings(&config.settings)),
            settings: config.settings,
            storage,
            resolver: Arc::new(resolver),
            dialer,
            event_tx,
            event_rx,
        }
    }

    /// Load persisted connections and history, dialing through russh
    pub async fn load(storage: ConfigStorage, resolver: AuthResolver) -> Result<Self, StorageError> {
        let config = storage.load().await?;
        let dialer = Arc::new(SshDialer::new(&config.settings));
        Ok(Self::new(storage, config, resolver, dialer))
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn selected(&self) -> Option<&ConnectionState> {
        self.registry.selected()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Connection management
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn add_connection(&mut self, form: &NewConnection) -> Result<ConnectionId, RegistryError> {
        let connection = form
            .validate()
            .map_err(|e| RegistryError::InvalidConnection(e.to_string()))?;
        let id = self.registry.add(connection);
        self.persist().await;
        Ok(id)
    }

    /// Remove a connection and close its session
    pub async fn delete_connection(&mut self, id: ConnectionId) -> Result<(), RegistryError> {
        let state = self.registry.remove(id)?;
        if let Some(session) = state.session {
            close_in_background(session);
        }
        self.scroll.reset();
        self.persist().await;
        Ok(())
    }

    pub fn select(&mut self, id: ConnectionId) -> Result<(), RegistryError> {
        if self.registry.selected_id() != Some(id) {
            self.scroll.reset();
        }
        self.registry.select(id)
    }

    pub fn select_next(&mut self) -> Option<ConnectionId> {
        self.scroll.reset();
        self.registry.select_next()
    }

    pub fn select_previous(&mut self) -> Option<ConnectionId> {
        self.scroll.reset();
        self.registry.select_previous()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Dispatch
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start connecting; returns `false` if the connection was already connecting or connected
    pub fn connect(&mut self, id: ConnectionId) -> Result<bool, RegistryError> {
        let Some(ticket) = self.registry.begin_connect(id)? else {
            return Ok(false);
        };

        info!(
            "Dispatching connect for {} (attempt {})",
            ticket.connection.alias, ticket.attempt
        );

        let resolver = self.resolver.clone();
        let dialer = self.dialer.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = SessionHandle::connect(dialer.as_ref(), &resolver, &ticket.connection).await;
            send_event(
                &tx,
                Event::ConnectFinished {
                    id: ticket.id,
                    attempt: ticket.attempt,
                    result,
                },
            )
            .await;
        });

        Ok(true)
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> Result<(), RegistryError> {
        if let Some(session) = self.registry.disconnect(id)? {
            info!("Disconnecting {}", session.address());
            close_in_background(session);
        }
        Ok(())
    }

    /// Probe a connected session; the answer arrives as [`Event::LivenessChecked`]
    pub fn check_alive(&mut self, id: ConnectionId) -> Result<(), ExecutionError> {
        let (session, attempt) = self.registry.live_session(id)?;
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = session.is_alive().await;
            send_event(&tx, Event::LivenessChecked { id, attempt, result }).await;
        });
        Ok(())
    }

    /// Record `command` in history and run it on the selected connection
    ///
    /// Precondition failures are returned immediately and change nothing but
    /// the history.
    pub async fn submit(&mut self, command: &str) -> Result<ConnectionId, ExecutionError> {
        if self.history.append(command) {
            self.persist().await;
        }
        self.cursor.reset();

        let id = self.registry.selected_id().ok_or(ExecutionError::NotConnected)?;
        let ticket = self.registry.begin_execution(id, command)?;
        self.scroll.reset();

        let executor = self.executor.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = executor.run(&ticket.session, ticket.execution).await;
            send_event(
                &tx,
                Event::CommandFinished {
                    id: ticket.id,
                    run: ticket.run,
                    result,
                },
            )
            .await;
        });

        Ok(id)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Completion
    // ═══════════════════════════════════════════════════════════════════════════

    /// Wait for the next completion message
    pub async fn next_event(&mut self) -> Option<Event> {
        self.event_rx.recv().await
    }

    /// Apply one completion message to the state
    pub fn apply(&mut self, event: Event) -> Update {
        match event {
            Event::ConnectFinished { id, attempt, result } => {
                match self.registry.finish_connect(id, attempt, result) {
                    ConnectOutcome::Connected => Update::StatusChanged {
                        connection_id: id,
                        status: ConnectionStatus::Connected,
                        error: None,
                    },
                    ConnectOutcome::Failed(cause) => Update::StatusChanged {
                        connection_id: id,
                        status: ConnectionStatus::Error,
                        error: Some(cause),
                    },
                    ConnectOutcome::Stale(session) => {
                        if let Some(session) = session {
                            close_in_background(session);
                        }
                        Update::Ignored { connection_id: id }
                    }
                }
            }
            Event::CommandFinished { id, run, result } => {
                match self.registry.finish_execution(id, run, result) {
                    ExecutionOutcome::Appended => {
                        let last = self.registry.get(id).and_then(|s| s.executions.last());
                        match last {
                            Some(execution) => Update::ExecutionAppended {
                                connection_id: id,
                                command: execution.command.clone(),
                                exit_code: execution.exit_code,
                            },
                            None => Update::Ignored { connection_id: id },
                        }
                    }
                    ExecutionOutcome::Failed { cause, session } => {
                        if let Some(session) = session {
                            close_in_background(session);
                        }
                        Update::ExecutionFailed {
                            connection_id: id,
                            error: cause,
                        }
                    }
                    ExecutionOutcome::Ignored => Update::Ignored { connection_id: id },
                }
            }
            Event::LivenessChecked { id, attempt, result } => match result {
                Ok(()) => Update::Liveness {
                    connection_id: id,
                    alive: true,
                    error: None,
                },
                Err(e) => {
                    let cause = e.to_string();
                    // A dead transport is treated like a dropped connection
                    if let Some(session) = self.registry.mark_failed(id, attempt, cause.clone()) {
                        close_in_background(session);
                    }
                    Update::Liveness {
                        connection_id: id,
                        alive: false,
                        error: Some(cause),
                    }
                }
            },
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // History recall and scrollback
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn history_up(&mut self) -> Option<String> {
        self.cursor.up(&self.history).map(str::to_string)
    }

    pub fn history_down(&mut self) -> String {
        self.cursor.down(&self.history).to_string()
    }

    pub fn scroll_up(&mut self, lines: usize) {
        let executions = self
            .registry
            .selected()
            .map(|s| s.executions.as_slice())
            .unwrap_or_default();
        self.scroll.scroll_up(lines, executions);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll.scroll_down(lines);
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll.offset()
    }

    /// Visible transcript lines of the selected connection
    pub fn transcript_window(&self, height: usize) -> Vec<TranscriptLine> {
        let Some(selected) = self.registry.selected() else {
            return Vec::new();
        };
        let lines = render_transcript(&selected.executions);
        self.scroll.visible(&lines, height).to_vec()
    }

    /// Write connections and history; failures are logged, never fatal
    async fn persist(&self) {
        let config = ConfigFile {
            version: CONFIG_VERSION,
            connections: self.registry.connections(),
            command_history: self.history.to_vec(),
            settings: self.settings.clone(),
        };
        if let Err(e) = self.storage.save(&config).await {
            warn!("Failed to persist config to {:?}: {}", self.storage.path(), e);
        }
    }
}

async fn send_event(tx: &mpsc::Sender<Event>, event: Event) {
    let id = event.connection_id();
    if tx.send(event).await.is_err() {
        debug!("Coordinator gone, dropping result for {}", id);
    }
}

fn close_in_background(session: SessionHandle) {
    tokio::spawn(async move {
        session.disconnect().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::session::auth::tests::{fake_home, write_key};
    use crate::session::CredentialSource;
    use crate::ssh::fakes::{RecordingDialer, ScriptedTransport};
    use crate::ssh::{RemoteOutput, RemoteTransport, SshError};

    struct Harness {
        coordinator: Coordinator,
        dialer: Arc<RecordingDialer>,
        transport: Arc<ScriptedTransport>,
        home: TempDir,
        _config_dir: TempDir,
    }

    fn harness(results: Vec<Result<RemoteOutput, SshError>>) -> Harness {
        let (home, env) = fake_home();
        write_key(home.path(), ".ssh/id_ed25519");
        let config_dir = tempfile::tempdir().unwrap();
        let storage = ConfigStorage::with_path(config_dir.path().join("connections.json"));

        let transport = ScriptedTransport::with_results(results);
        let dialer = Arc::new(RecordingDialer::new(transport.clone()));
        let coordinator = Coordinator::new(
            storage,
            ConfigFile::default(),
            AuthResolver::new(env),
            dialer.clone(),
        );

        Harness {
            coordinator,
            dialer,
            transport,
            home,
            _config_dir: config_dir,
        }
    }

    fn db1_form() -> NewConnection {
        NewConnection {
            alias: "db1".to_string(),
            host: "10.0.0.5".to_string(),
            user: "ops".to_string(),
            port: String::new(),
            key_path: String::new(),
        }
    }

    fn ok(stdout: &str, exit_code: i32) -> Result<RemoteOutput, SshError> {
        Ok(RemoteOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
        })
    }

    async fn next_update(coordinator: &mut Coordinator) -> Update {
        let event = tokio::time::timeout(Duration::from_secs(5), coordinator.next_event())
            .await
            .unwrap()
            .unwrap();
        coordinator.apply(event)
    }

    async fn connected(h: &mut Harness) -> ConnectionId {
        let id = h.coordinator.add_connection(&db1_form()).await.unwrap();
        assert!(h.coordinator.connect(id).unwrap());
        next_update(&mut h.coordinator).await;
        id
    }

    #[tokio::test]
    async fn test_end_to_end_connect_with_default_key() {
        let mut h = harness(vec![]);
        let id = h.coordinator.add_connection(&db1_form()).await.unwrap();
        assert_eq!(
            h.coordinator.registry().get(id).unwrap().status,
            ConnectionStatus::Disconnected
        );

        assert!(h.coordinator.connect(id).unwrap());
        assert_eq!(
            h.coordinator.registry().get(id).unwrap().status,
            ConnectionStatus::Connecting
        );

        let update = next_update(&mut h.coordinator).await;
        assert_eq!(
            update,
            Update::StatusChanged {
                connection_id: id,
                status: ConnectionStatus::Connected,
                error: None,
            }
        );

        let offered = h.dialer.offered.lock().unwrap();
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].len(), 1);
        assert_eq!(offered[0][0].source, CredentialSource::DefaultPath);
        assert_eq!(
            offered[0][0].path(),
            Some(h.home.path().join(".ssh/id_ed25519").as_path())
        );
    }

    #[tokio::test]
    async fn test_second_connect_is_noop() {
        let mut h = harness(vec![]);
        let id = h.coordinator.add_connection(&db1_form()).await.unwrap();

        assert!(h.coordinator.connect(id).unwrap());
        assert!(!h.coordinator.connect(id).unwrap());
        next_update(&mut h.coordinator).await;
        assert!(!h.coordinator.connect(id).unwrap());

        assert_eq!(h.dialer.offered.lock().unwrap().len(), 1);
        assert_eq!(
            h.coordinator.registry().get(id).unwrap().status,
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_dial_failure_sets_error() {
        let (home, env) = fake_home();
        write_key(home.path(), ".ssh/id_ed25519");
        let config_dir = tempfile::tempdir().unwrap();
        let mut coordinator = Coordinator::new(
            ConfigStorage::with_path(config_dir.path().join("connections.json")),
            ConfigFile::default(),
            AuthResolver::new(env),
            Arc::new(RecordingDialer::failing()),
        );
        let id = coordinator.add_connection(&db1_form()).await.unwrap();

        coordinator.connect(id).unwrap();
        let update = next_update(&mut coordinator).await;

        assert!(matches!(
            update,
            Update::StatusChanged {
                status: ConnectionStatus::Error,
                error: Some(_),
                ..
            }
        ));
        assert!(coordinator.registry().get(id).unwrap().last_error.is_some());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_appended_not_failed() {
        let mut h = harness(vec![ok("", 1)]);
        let id = connected(&mut h).await;

        h.coordinator.submit("grep nothing /etc/hosts").await.unwrap();
        let dispatched = h.coordinator.registry().get(id).unwrap().current.clone().unwrap();
        let update = next_update(&mut h.coordinator).await;

        assert_eq!(
            update,
            Update::ExecutionAppended {
                connection_id: id,
                command: "grep nothing /etc/hosts".to_string(),
                exit_code: 1,
            }
        );
        let state = h.coordinator.registry().get(id).unwrap();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert!(state.executions[0].completed);
        assert_eq!(state.executions[0].submitted_at, dispatched.submitted_at);
        assert!(state.current.is_none());
    }

    #[tokio::test]
    async fn test_submit_preconditions_do_not_touch_network() {
        let mut h = harness(vec![]);
        h.coordinator.add_connection(&db1_form()).await.unwrap();

        let result = h.coordinator.submit("uptime").await;

        assert!(matches!(result, Err(ExecutionError::NotConnected)));
        assert!(h.transport.commands.lock().unwrap().is_empty());
        assert_eq!(h.coordinator.history().get(0), Some("uptime"));
    }

    #[tokio::test]
    async fn test_already_executing() {
        let mut h = harness(vec![]);
        connected(&mut h).await;

        h.coordinator.submit("sleep 1").await.unwrap();
        assert!(matches!(
            h.coordinator.submit("uptime").await,
            Err(ExecutionError::AlreadyExecuting)
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_moves_to_error() {
        let mut h = harness(vec![Err(SshError::Disconnected)]);
        let id = connected(&mut h).await;

        h.coordinator.submit("uptime").await.unwrap();
        let update = next_update(&mut h.coordinator).await;

        assert!(matches!(update, Update::ExecutionFailed { .. }));
        let state = h.coordinator.registry().get(id).unwrap();
        assert_eq!(state.status, ConnectionStatus::Error);
        assert!(state.executions.is_empty());
    }

    #[tokio::test]
    async fn test_liveness_failure_marks_error() {
        let mut h = harness(vec![ok("ping\n", 0), Err(SshError::Disconnected)]);
        let id = connected(&mut h).await;

        h.coordinator.check_alive(id).unwrap();
        assert!(matches!(
            next_update(&mut h.coordinator).await,
            Update::Liveness { alive: true, .. }
        ));
        assert_eq!(
            h.coordinator.registry().get(id).unwrap().status,
            ConnectionStatus::Connected
        );

        h.coordinator.check_alive(id).unwrap();
        assert!(matches!(
            next_update(&mut h.coordinator).await,
            Update::Liveness { alive: false, .. }
        ));
        assert_eq!(
            h.coordinator.registry().get(id).unwrap().status,
            ConnectionStatus::Error
        );
    }

    #[tokio::test]
    async fn test_connect_result_after_disconnect_is_ignored() {
        let mut h = harness(vec![]);
        let id = h.coordinator.add_connection(&db1_form()).await.unwrap();

        h.coordinator.connect(id).unwrap();
        h.coordinator.disconnect(id).unwrap();
        let update = next_update(&mut h.coordinator).await;

        assert_eq!(update, Update::Ignored { connection_id: id });
        assert_eq!(
            h.coordinator.registry().get(id).unwrap().status,
            ConnectionStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn test_history_is_persisted_and_recalled() {
        let mut h = harness(vec![ok("a\n", 0), ok("b\n", 0)]);
        connected(&mut h).await;

        h.coordinator.submit("ls").await.unwrap();
        next_update(&mut h.coordinator).await;
        h.coordinator.submit("pwd").await.unwrap();
        next_update(&mut h.coordinator).await;

        assert_eq!(h.coordinator.history_up().as_deref(), Some("pwd"));
        assert_eq!(h.coordinator.history_up().as_deref(), Some("ls"));
        assert_eq!(h.coordinator.history_down(), "pwd");

        let saved = h.coordinator.storage.load().await.unwrap();
        assert_eq!(saved.command_history, vec!["ls", "pwd"]);
        assert_eq!(saved.connections.len(), 1);
        assert_eq!(saved.connections[0].alias, "db1");
    }

    #[tokio::test]
    async fn test_transcript_and_scrolling() {
        let mut h = harness(vec![ok("one\ntwo\n", 0)]);
        connected(&mut h).await;
        h.coordinator.submit("cat file").await.unwrap();
        next_update(&mut h.coordinator).await;

        let window = h.coordinator.transcript_window(10);
        assert_eq!(window.len(), 4);
        assert_eq!(window[2], TranscriptLine::Stdout("one".to_string()));

        h.coordinator.scroll_up(100);
        // 3 + 3 stdout segments
        assert_eq!(h.coordinator.scroll_offset(), 6);
        h.coordinator.scroll_down(100);
        assert_eq!(h.coordinator.scroll_offset(), 0);
    }

    #[tokio::test]
    async fn test_invalid_form_is_rejected() {
        let mut h = harness(vec![]);
        let form = NewConnection {
            host: String::new(),
            ..db1_form()
        };

        assert!(matches!(
            h.coordinator.add_connection(&form).await,
            Err(RegistryError::InvalidConnection(_))
        ));
        assert!(h.coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_delete_closes_session() {
        let mut h = harness(vec![]);
        let id = connected(&mut h).await;

        h.coordinator.delete_connection(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.coordinator.registry().is_empty());
        assert!(h.transport.is_closed());
    }
}
