//! SFTP / transfer error types

use std::fmt;
use std::io;

use thiserror::Error;

use crate::ssh::SshError;

/// The step of a transfer that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    Open,
    Create,
    Copy,
    CreateDir,
    Sync,
    Close,
    ReadDir,
}

impl fmt::Display for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferOp::Open => "open",
            TransferOp::Create => "create",
            TransferOp::Copy => "copy",
            TransferOp::CreateDir => "create directory",
            TransferOp::Sync => "sync",
            TransferOp::Close => "close",
            TransferOp::ReadDir => "read directory",
        })
    }
}

#[derive(Error, Debug)]
pub enum SftpError {
    /// The source or destination path could not be inspected
    #[error("Cannot stat {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A step failed part way through a transfer
    #[error("Failed to {op} {path}: {source}")]
    Transfer {
        op: TransferOp,
        path: String,
        #[source]
        source: io::Error,
    },

    /// Neither a regular file nor a directory
    #[error("Unsupported file type: {path}")]
    Unsupported { path: String },

    #[error(transparent)]
    Channel(#[from] SshError),
}

impl SftpError {
    pub(crate) fn stat(path: impl fmt::Display, source: io::Error) -> Self {
        SftpError::Stat {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn transfer(op: TransferOp, path: impl fmt::Display, source: io::Error) -> Self {
        SftpError::Transfer {
            op,
            path: path.to_string(),
            source,
        }
    }

    /// The path the error refers to, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            SftpError::Stat { path, .. }
            | SftpError::Transfer { path, .. }
            | SftpError::Unsupported { path } => Some(path),
            SftpError::Channel(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SftpError::Stat { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_names_op_and_path() {
        let err = SftpError::transfer(
            TransferOp::Copy,
            "/srv/app/config.toml",
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to copy /srv/app/config.toml: pipe closed"
        );
        assert_eq!(err.path(), Some("/srv/app/config.toml"));
    }

    #[test]
    fn test_not_found_stat() {
        let err = SftpError::stat("/missing", io::ErrorKind::NotFound.into());
        assert!(err.is_not_found());
        assert!(!SftpError::Unsupported { path: "/dev/null".into() }.is_not_found());
    }
}
