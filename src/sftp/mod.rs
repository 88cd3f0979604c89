//! SFTP module - remote filesystem access and tree transfers

pub mod client;
pub mod error;
pub mod fs;
pub mod path_utils;
pub mod transfer;
pub mod types;
pub mod walk;

pub use client::RusshSftp;
pub use error::{SftpError, TransferOp};
pub use fs::{RemoteDirEntry, RemoteFs, RemoteMetadata, RemoteReader, RemoteWriter};
pub use transfer::{download, download_with, upload, upload_with};
pub use types::{FileType, TransferSummary};
pub use walk::{LocalWalker, RemoteWalker, TransferNode};
