//! Session lifecycle and execution engine
//!
//! - `auth`: ordered credential resolution
//! - `registry`: per-connection state machine and selection
//! - `executor`: one command run on a connected session
//! - `history`: bounded command history with up/down recall
//! - `scrollback`: transcript rendering and scroll offset

pub mod auth;
pub mod executor;
pub mod history;
pub mod registry;
pub mod scrollback;
pub mod types;

pub use auth::{AuthEnvironment, AuthResolver, Credential, CredentialKind, CredentialSource, KeyError};
pub use executor::{check_preconditions, CommandExecutor, ExecutionError};
pub use history::{HistoryCursor, HistoryLog};
pub use registry::{
    ConnectOutcome, ConnectTicket, ConnectionRegistry, ExecutionOutcome, RegistryError, RunTicket,
};
pub use scrollback::{estimate_total_lines, render_transcript, ScrollbackModel, TranscriptLine};
pub use types::{CommandExecution, ConnectionId, ConnectionState, ConnectionStatus};
