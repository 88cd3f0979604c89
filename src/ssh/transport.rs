//! Transport provider seam
//!
//! A [`Transport`] is one authenticated, encrypted connection able to open
//! independent sub-channels: command channels ([`ExecChannel`]) and
//! remote-filesystem channels ([`RemoteFs`]). [`RusshTransport`] is the
//! production implementation on top of russh.

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Sig};
use tracing::debug;

use super::error::SshError;
use super::handle_owner::HandleController;
use crate::sftp::client::RusshSftp;
use crate::sftp::fs::RemoteFs;

/// One live connection to a remote host
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh session channel for running one command
    async fn open_exec_channel(&self) -> Result<Box<dyn ExecChannel>, SshError>;

    /// Open a fresh session channel running the SFTP subsystem
    async fn open_sftp_channel(&self) -> Result<Box<dyn RemoteFs>, SshError>;

    /// Tear the connection down. Open sub-channels fail afterwards.
    async fn disconnect(&self) -> Result<(), SshError>;

    fn is_connected(&self) -> bool;
}

/// Something that happened on a command channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
    ExitSignal(String),
    /// Reply to the oldest outstanding env or exec request
    RequestSuccess,
    RequestFailure,
    Eof,
}

/// A session channel used for a single command
#[async_trait]
pub trait ExecChannel: Send {
    async fn set_env(&mut self, name: &str, value: &str) -> Result<(), SshError>;

    async fn exec(&mut self, command: &str) -> Result<(), SshError>;

    /// Next event, or `None` once the remote has closed the channel
    async fn next_event(&mut self) -> Option<ExecEvent>;

    async fn close(&mut self) -> Result<(), SshError>;
}

/// [`Transport`] backed by a russh connection owned by the handle owner task
pub struct RusshTransport {
    controller: HandleController,
}

impl RusshTransport {
    pub fn new(controller: HandleController) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn open_exec_channel(&self) -> Result<Box<dyn ExecChannel>, SshError> {
        let channel = self.controller.open_session_channel().await?;
        debug!("Opened exec channel {:?}", channel.id());
        Ok(Box::new(RusshExecChannel::new(channel)))
    }

    async fn open_sftp_channel(&self) -> Result<Box<dyn RemoteFs>, SshError> {
        let channel = self.controller.open_session_channel().await?;
        let sftp = RusshSftp::open(channel).await?;
        Ok(Box::new(sftp))
    }

    async fn disconnect(&self) -> Result<(), SshError> {
        self.controller.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }
}

/// Signal name as the server sent it, without the `SIG` prefix
fn signal_name_of(sig: &Sig) -> String {
    match sig {
        Sig::ABRT => "ABRT",
        Sig::ALRM => "ALRM",
        Sig::FPE => "FPE",
        Sig::HUP => "HUP",
        Sig::ILL => "ILL",
        Sig::INT => "INT",
        Sig::KILL => "KILL",
        Sig::PIPE => "PIPE",
        Sig::QUIT => "QUIT",
        Sig::SEGV => "SEGV",
        Sig::TERM => "TERM",
        Sig::USR1 => "USR1",
        Sig::Custom(name) => name.as_str(),
    }
    .to_string()
}

/// [`ExecChannel`] over a russh session channel
pub struct RusshExecChannel {
    channel: Channel<Msg>,
    /// The server already sent CHANNEL_CLOSE
    peer_closed: bool,
}

impl RusshExecChannel {
    pub fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            peer_closed: false,
        }
    }
}

#[async_trait]
impl ExecChannel for RusshExecChannel {
    async fn set_env(&mut self, name: &str, value: &str) -> Result<(), SshError> {
        self.channel
            .set_env(true, name, value)
            .await
            .map_err(|e| SshError::ChannelError(format!("env request failed: {}", e)))
    }

    async fn exec(&mut self, command: &str) -> Result<(), SshError> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(format!("exec request failed: {}", e)))
    }

    async fn next_event(&mut self) -> Option<ExecEvent> {
        loop {
            let msg = self.channel.wait().await?;
            match msg {
                ChannelMsg::Data { data } => return Some(ExecEvent::Stdout(data.to_vec())),
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        return Some(ExecEvent::Stderr(data.to_vec()));
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    return Some(ExecEvent::ExitStatus(exit_status))
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    return Some(ExecEvent::ExitSignal(signal_name_of(&signal_name)))
                }
                ChannelMsg::Success => return Some(ExecEvent::RequestSuccess),
                ChannelMsg::Failure => return Some(ExecEvent::RequestFailure),
                ChannelMsg::Eof => return Some(ExecEvent::Eof),
                ChannelMsg::Close => {
                    self.peer_closed = true;
                    return None;
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), SshError> {
        if self.peer_closed {
            return Ok(());
        }
        self.peer_closed = true;
        self.channel
            .close()
            .await
            .map_err(|e| SshError::ChannelError(format!("close failed: {}", e)))
    }
}
