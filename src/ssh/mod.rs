//! SSH module - handles SSH connections and remote command execution
//!
//! This module provides the transport layer using the russh library.
//!
//! # Features
//! - Direct SSH connections with ordered credential fallback
//! - SSH agent identities
//! - Host key verification via ~/.ssh/known_hosts
//! - One exec channel per command, stdout and stderr captured separately

pub mod agent;
mod client;
mod error;
mod handle_owner;
mod session;

pub use agent::{agent_socket_from_env, SshAgentClient};
pub use client::{ClientHandler, SshClient, SshDialer};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController, SIGNAL_EXIT_CODE};
pub use session::{Dialer, RemoteOutput, RemoteTransport, SessionHandle};

#[cfg(test)]
pub(crate) use session::tests as fakes;
