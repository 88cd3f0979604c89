//! SSH Error types

use std::time::Duration;

use thiserror::Error;

/// Failure to establish a session.
///
/// Each variant is a distinct outcome so callers can tell an authentication
/// failure from a network failure from a host identity rejection.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error(
        "Host key verification failed: unknown host {host}. Fingerprint: {fingerprint}. \
         Add it to known_hosts or select the insecure policy explicitly."
    )]
    UnknownHost { host: String, fingerprint: String },

    #[error(
        "HOST KEY VERIFICATION FAILED: key for {host} has changed! \
         Expected: {expected_fingerprint}, Actual: {actual_fingerprint}. \
         This could indicate a man-in-the-middle attack."
    )]
    HostKeyMismatch {
        host: String,
        expected_fingerprint: String,
        actual_fingerprint: String,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("SSH Agent error: {0}")]
    Agent(String),

    #[error("SSH protocol error: {0}")]
    Protocol(String),
}

impl ConnectError {
    /// True for the two host identity rejections.
    pub fn is_host_key_rejection(&self) -> bool {
        matches!(
            self,
            ConnectError::UnknownHost { .. } | ConnectError::HostKeyMismatch { .. }
        )
    }
}

impl From<russh::Error> for ConnectError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(e) => ConnectError::Network(e.to_string()),
            other => ConnectError::Protocol(other.to_string()),
        }
    }
}

impl From<russh::keys::Error> for ConnectError {
    fn from(err: russh::keys::Error) -> Self {
        ConnectError::Key(err.to_string())
    }
}

/// Errors raised on an established session and its sub-channels.
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Remote rejected request: {0}")]
    Rejected(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Disconnected")]
    Disconnected,

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::Disconnect => SshError::Disconnected,
            other => SshError::ProtocolError(other.to_string()),
        }
    }
}
