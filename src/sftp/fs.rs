//! Remote filesystem seam
//!
//! [`RemoteFs`] is the RPC surface the transfer engine needs from the remote
//! side. The production implementation is [`super::client::RusshSftp`].

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::path_utils::join_remote_path;
use super::types::FileType;

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub file_type: FileType,
    pub size: u64,
    /// Unix mode bits, when the server reports them
    pub permissions: Option<u32>,
    /// Modification time in seconds since the epoch
    pub modified: Option<u64>,
}

impl RemoteMetadata {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }
}

/// One child of a remote directory. Metadata describes the entry itself,
/// not the target of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    pub name: String,
    pub metadata: RemoteMetadata,
}

/// Remote filesystem client bound to one sub-channel
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Metadata for `path`, following symlinks
    async fn stat(&self, path: &str) -> io::Result<RemoteMetadata>;

    /// Children of `path`, without `.` and `..`
    async fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteDirEntry>>;

    async fn open(&self, path: &str) -> io::Result<RemoteReader>;

    /// Create or truncate `path` for writing
    async fn create(&self, path: &str) -> io::Result<RemoteWriter>;

    /// Create a single directory. The parent must exist.
    async fn mkdir(&self, path: &str) -> io::Result<()>;

    /// End the RPC session
    async fn close(&self) -> io::Result<()>;

    /// Create `path` and any missing ancestors.
    ///
    /// Existing directories are not an error. A non-directory in the way is.
    async fn mkdir_all(&self, path: &str) -> io::Result<()> {
        let mut prefix = if path.starts_with('/') {
            "/".to_string()
        } else {
            String::new()
        };

        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            prefix = join_remote_path(&prefix, component);
            match self.stat(&prefix).await {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} exists and is not a directory", prefix),
                    ))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if let Err(mkdir_err) = self.mkdir(&prefix).await {
                        // Someone else may have created it in between
                        match self.stat(&prefix).await {
                            Ok(meta) if meta.is_dir() => {}
                            _ => return Err(mkdir_err),
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
