//! SSH Session management
//!
//! A [`Session`] owns one transport connection and hands out independent
//! sub-channels. Every sub-channel carries a [`ChannelGuard`], so the session
//! always knows how many are live, and closing the session aborts the ones
//! still running.

use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::SshClient;
use super::config::SshConfig;
use super::error::{ConnectError, SshError};
use super::exec::{self, CommandOutput, ExecError};
use super::transport::{ExecChannel, ExecEvent, Transport};
use crate::sftp::error::SftpError;
use crate::sftp::fs::RemoteFs;
use crate::sftp::transfer;
use crate::sftp::types::TransferSummary;

/// RAII marker for one open sub-channel. Decrements the session count on drop.
pub struct ChannelGuard {
    open: Arc<AtomicUsize>,
}

impl ChannelGuard {
    fn new(open: Arc<AtomicUsize>) -> Self {
        let now = open.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Sub-channel opened, open count: {}", now);
        Self { open }
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let result = self
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match result {
            Ok(prev) => debug!("Sub-channel released, open count: {}", prev - 1),
            Err(_) => warn!("Sub-channel released with open count already 0"),
        }
    }
}

/// A sub-channel dedicated to one command
pub struct CommandChannel {
    inner: Box<dyn ExecChannel>,
    _guard: ChannelGuard,
}

impl CommandChannel {
    pub async fn set_env(&mut self, name: &str, value: &str) -> Result<(), SshError> {
        self.inner.set_env(name, value).await
    }

    pub async fn exec(&mut self, command: &str) -> Result<(), SshError> {
        self.inner.exec(command).await
    }

    pub async fn next_event(&mut self) -> Option<ExecEvent> {
        self.inner.next_event().await
    }

    pub async fn close(&mut self) -> Result<(), SshError> {
        self.inner.close().await
    }
}

/// A remote filesystem client bound to its own sub-channel.
///
/// Not shared between transfers; close it when the operation is done.
pub struct RemoteFsHandle {
    inner: Box<dyn RemoteFs>,
    _guard: ChannelGuard,
}

impl RemoteFsHandle {
    /// Close the RPC client and release the sub-channel
    pub async fn close(self) -> std::io::Result<()> {
        self.inner.close().await
    }
}

impl Deref for RemoteFsHandle {
    type Target = dyn RemoteFs;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

/// One established connection plus its configuration
pub struct Session {
    id: String,
    config: Arc<SshConfig>,
    transport: Arc<dyn Transport>,
    open_channels: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    /// Dial, verify the host and authenticate
    pub async fn establish(config: SshConfig) -> Result<Session, ConnectError> {
        SshClient::new(config).connect().await
    }

    /// Wrap an already established transport
    pub fn from_transport(
        id: impl Into<String>,
        config: SshConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id: id.into(),
            config: Arc::new(config),
            transport,
            open_channels: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Sub-channels currently open on this session
    pub fn channel_count(&self) -> usize {
        self.open_channels.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.transport.is_connected()
    }

    /// Fires when [`Session::close`] is called
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn ensure_open(&self) -> Result<(), SshError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SshError::SessionClosed);
        }
        Ok(())
    }

    /// Open a sub-channel for one command
    pub async fn open_command_channel(&self) -> Result<CommandChannel, SshError> {
        self.ensure_open()?;
        let inner = self.transport.open_exec_channel().await?;
        Ok(CommandChannel {
            inner,
            _guard: ChannelGuard::new(self.open_channels.clone()),
        })
    }

    /// Open a sub-channel running a remote filesystem client
    pub async fn open_filesystem_channel(&self) -> Result<RemoteFsHandle, SshError> {
        self.ensure_open()?;
        let inner = self.transport.open_sftp_channel().await?;
        info!("Opened filesystem channel for session {}", self.id);
        Ok(RemoteFsHandle {
            inner,
            _guard: ChannelGuard::new(self.open_channels.clone()),
        })
    }

    /// Run a command line and collect its combined stdout/stderr
    pub async fn run(&self, command_line: &str) -> Result<CommandOutput, ExecError> {
        exec::execute(self, command_line, &[], None).await
    }

    /// Like [`Session::run`], aborting the command when `cancel` fires
    pub async fn run_cancellable(
        &self,
        cancel: &CancellationToken,
        command_line: &str,
    ) -> Result<CommandOutput, ExecError> {
        exec::execute(self, command_line, &[], Some(cancel)).await
    }

    /// Copy a local file or directory tree to `remote_path`
    pub async fn upload(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> Result<TransferSummary, SftpError> {
        transfer::upload(self, local_path.as_ref(), remote_path).await
    }

    /// Copy a remote file or directory tree to `local_path`
    pub async fn download(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TransferSummary, SftpError> {
        transfer::download(self, remote_path, local_path.as_ref()).await
    }

    /// Close the session. In-flight commands are aborted and the transport
    /// is disconnected. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), SshError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Session {} already closed", self.id);
            return Ok(());
        }

        info!(
            "Closing session {} ({} sub-channels open)",
            self.id,
            self.channel_count()
        );
        self.shutdown.cancel();
        self.transport.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{session_with, MockTransport};

    #[tokio::test]
    async fn test_channel_count_follows_guards() {
        let (session, _mock) = session_with(MockTransport::new());
        assert_eq!(session.channel_count(), 0);

        let first = session.open_command_channel().await.unwrap();
        let second = session.open_filesystem_channel().await.unwrap();
        assert_eq!(session.channel_count(), 2);

        drop(first);
        assert_eq!(session.channel_count(), 1);
        second.close().await.unwrap();
        assert_eq!(session.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, mock) = session_with(MockTransport::new());

        session.close().await.unwrap();
        session.close().await.unwrap();

        assert!(session.is_closed());
        assert_eq!(mock.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_open_after_close_fails() {
        let (session, mock) = session_with(MockTransport::new());
        session.close().await.unwrap();

        assert!(matches!(
            session.open_command_channel().await,
            Err(SshError::SessionClosed)
        ));
        assert!(matches!(
            session.open_filesystem_channel().await,
            Err(SshError::SessionClosed)
        ));
        assert_eq!(mock.exec_channels_opened(), 0);
    }

    #[tokio::test]
    async fn test_establish_without_policy_fails_before_dialing() {
        let config = SshConfig::new("deploy", "192.0.2.1", crate::ssh::AuthMethod::Agent);
        assert!(matches!(
            Session::establish(config).await,
            Err(ConnectError::Config(_))
        ));
    }
}
