//! ShellFleet - manage several SSH connections from one console
//!
//! - `config`: persisted connections/history and read-only `~/.ssh/config` parsing
//! - `ssh`: russh transport, agent access and host key checks
//! - `session`: credential resolution, connection state, execution, history, scrollback
//! - `coordinator`: single owner of all state, fed by completion events

pub mod config;
pub mod coordinator;
pub mod session;
pub mod ssh;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use coordinator::{Coordinator, Event, Update};

/// Initialize logging
///
/// Filter comes from `RUST_LOG` (default `info`). Logs go to stderr so that
/// stdout carries only the transcript.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
