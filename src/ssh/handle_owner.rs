//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. All other components
//! communicate with it via `HandleController`, which sends commands through
//! an mpsc channel and waits for the reply on a oneshot.
//!
//! # Usage
//!
//! ```ignore
//! let controller = spawn_handle_owner_task(handle, "10.0.0.5:22".to_string());
//! let output = controller.exec("uptime", &[]).await?;
//! controller.disconnect().await;
//! ```

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;
use super::session::{RemoteOutput, RemoteTransport};

/// Exit code recorded when the remote command was killed by a signal
pub const SIGNAL_EXIT_CODE: i32 = 255;

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (for exec)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning only copies the sender. Exclusive use per connection is enforced
/// one level up: at most one command runs on a connection at a time.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
}

impl HandleController {
    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Run one command on its own channel and collect its output
    ///
    /// `env` is requested before the command starts; servers that refuse
    /// variables are ignored.
    pub async fn exec(&self, command: &str, env: &[(String, String)]) -> Result<RemoteOutput, SshError> {
        let mut channel = self.open_session_channel().await?;

        for (name, value) in env {
            if let Err(e) = channel.set_env(false, name.as_str(), value.as_str()).await {
                debug!("Server refused env {}: {}", name, e);
            }
        }

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(format!("exec request failed: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: Option<i32> = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                // Extended data type 1 is stderr
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status as i32);
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    debug!("Remote command terminated by signal {:?}", signal_name);
                    exit_code.get_or_insert(SIGNAL_EXIT_CODE);
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let exit_code = exit_code.ok_or(SshError::Disconnected)?;

        Ok(RemoteOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

#[async_trait]
impl RemoteTransport for HandleController {
    async fn exec(&self, command: &str, env: &[(String, String)]) -> Result<RemoteOutput, SshError> {
        HandleController::exec(self, command, env).await
    }

    async fn close(&self) {
        self.disconnect().await;
    }

    fn is_closed(&self) -> bool {
        !self.is_connected()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a HandleController for sending commands.
/// `label` only appears in logs.
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, label: String) -> HandleController {
    let (cmd_tx, cmd_rx) = mpsc::channel::<HandleCommand>(64);
    tokio::spawn(run_owner_loop(handle, cmd_rx, label));
    HandleController { cmd_tx }
}

async fn run_owner_loop(
    handle: Handle<ClientHandler>,
    mut cmd_rx: mpsc::Receiver<HandleCommand>,
    label: String,
) {
    info!("Handle owner task started for {}", label);

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let result = handle.channel_open_session().await;
                if reply_tx.send(result).is_err() {
                    warn!("Caller dropped before receiving channel_open_session result");
                }
            }
            HandleCommand::Disconnect => {
                info!("Disconnect requested for {}", label);
                break;
            }
        }
    }

    drain_pending_commands(&mut cmd_rx);

    let _ = handle
        .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
        .await;
    info!("Handle owner task terminated for {}", label);
}

/// Drain all pending commands, returning Disconnected error to each
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}
