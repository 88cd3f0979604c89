//! [`RemoteFs`] over the SFTP subsystem, using russh-sftp

use std::io;

use async_trait::async_trait;
use russh::client::Msg;
use russh::Channel;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::FileAttributes;
use tracing::{debug, info};

use super::fs::{RemoteDirEntry, RemoteFs, RemoteMetadata, RemoteReader, RemoteWriter};
use super::types::FileType;
use crate::ssh::SshError;

/// An SFTP client running on one dedicated session channel
pub struct RusshSftp {
    sftp: RusshSftpSession,
}

impl RusshSftp {
    /// Start the `sftp` subsystem on `channel`
    pub async fn open(channel: Channel<Msg>) -> Result<Self, SshError> {
        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            SshError::Rejected(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::ProtocolError(format!("SFTP init failed: {}", e)))?;

        info!("SFTP subsystem opened");
        Ok(Self { sftp })
    }
}

/// Map an SFTP status to the closest io error kind
fn map_sftp_error(err: impl std::fmt::Display) -> io::Error {
    let err_str = err.to_string();
    let kind = if err_str.contains("No such file") || err_str.contains("not found") {
        io::ErrorKind::NotFound
    } else if err_str.contains("Permission denied") {
        io::ErrorKind::PermissionDenied
    } else if err_str.contains("already exists") {
        io::ErrorKind::AlreadyExists
    } else {
        io::ErrorKind::Other
    };
    io::Error::new(kind, err_str)
}

fn to_metadata(attrs: &FileAttributes) -> RemoteMetadata {
    let file_type = if attrs.is_dir() {
        FileType::Directory
    } else if attrs.is_symlink() {
        FileType::Symlink
    } else if attrs.is_regular() {
        FileType::File
    } else {
        FileType::Unknown
    };

    RemoteMetadata {
        file_type,
        size: attrs.size.unwrap_or(0),
        permissions: attrs.permissions,
        modified: attrs.mtime.map(u64::from),
    }
}

#[async_trait]
impl RemoteFs for RusshSftp {
    async fn stat(&self, path: &str) -> io::Result<RemoteMetadata> {
        let attrs = self.sftp.metadata(path).await.map_err(map_sftp_error)?;
        Ok(to_metadata(&attrs))
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteDirEntry>> {
        let entries = self.sftp.read_dir(path).await.map_err(map_sftp_error)?;
        Ok(entries
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| RemoteDirEntry {
                name: entry.file_name(),
                metadata: to_metadata(&entry.metadata()),
            })
            .collect())
    }

    async fn open(&self, path: &str) -> io::Result<RemoteReader> {
        let file = self.sftp.open(path).await.map_err(map_sftp_error)?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &str) -> io::Result<RemoteWriter> {
        let file = self.sftp.create(path).await.map_err(map_sftp_error)?;
        Ok(Box::new(file))
    }

    async fn mkdir(&self, path: &str) -> io::Result<()> {
        debug!("SFTP mkdir {}", path);
        self.sftp.create_dir(path).await.map_err(map_sftp_error)
    }

    async fn close(&self) -> io::Result<()> {
        self.sftp.close().await.map_err(map_sftp_error)
    }
}
