//! Handle Owner Task
//!
//! Only one task owns the russh `Handle<ClientHandler>`. Everything else talks
//! to it through a [`HandleController`], which sends commands over an mpsc
//! channel and receives replies on oneshot channels. Each channel open runs in
//! its own task, so a slow open neither delays other opens nor a disconnect.

use std::sync::Arc;

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (for exec or a subsystem)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection, replying once the transport is down
    Disconnect {
        reply_tx: oneshot::Sender<Result<(), russh::Error>>,
    },
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning is cheap (copies the sender). Any holder has full control of
/// the connection, so it stays inside the crate.
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

    /// Disconnect the SSH connection.
    ///
    /// Returns `Ok(())` if the owner task is already gone.
    pub async fn disconnect(&self) -> Result<(), SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(HandleCommand::Disconnect { reply_tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        match reply_rx.await {
            Ok(result) => result.map_err(SshError::from),
            Err(_) => Ok(()),
        }
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a HandleController for sending commands.
/// The task ends on an explicit disconnect or once every controller is dropped.
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    session_id: String,
) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);

    tokio::spawn(async move {
        // Opens in flight borrow the handle through their own clone
        let handle = Arc::new(handle);

        info!("Handle owner task started for session {}", session_id);

        let mut disconnect_reply = None;

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                HandleCommand::ChannelOpenSession { reply_tx } => {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        let result = handle.channel_open_session().await;
                        if reply_tx.send(result).is_err() {
                            // Channel is dropped here, the server closes it
                            warn!("Caller dropped before receiving channel_open_session result");
                        }
                    });
                }

                HandleCommand::Disconnect { reply_tx } => {
                    info!("Disconnect requested for session {}", session_id);
                    disconnect_reply = Some(reply_tx);
                    break;
                }
            }
        }

        if disconnect_reply.is_none() {
            info!("All controllers dropped for session {}", session_id);
        }

        drain_pending_commands(&mut cmd_rx);

        let result = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        if let Some(reply_tx) = disconnect_reply {
            let _ = reply_tx.send(result);
        }
        info!("Handle owner task terminated for session {}", session_id);
    });

    HandleController { cmd_tx }
}

/// Drain all pending commands, returning Disconnect to each
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    // Close receiver first, prevent new messages
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect { reply_tx } => {
                let _ = reply_tx.send(Ok(()));
            }
        }
    }
}
