//! Tree transfer engine
//!
//! Upload and download of a single file or a whole directory tree. One
//! filesystem sub-channel serves the whole top-level call and is closed before
//! it returns. The first failure aborts the walk; nodes already written stay.

use std::path::Path;

use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::error::{SftpError, TransferOp};
use super::fs::RemoteFs;
use super::path_utils::join_remote_relative;
use super::types::{FileType, TransferSummary};
use super::walk::{LocalWalker, RemoteWalker};
use crate::ssh::session::{RemoteFsHandle, Session};

/// Copy `local` (file or directory) to `remote` over a fresh filesystem channel
pub async fn upload(
    session: &Session,
    local: &Path,
    remote: &str,
) -> Result<TransferSummary, SftpError> {
    // Nothing is opened remotely for a source that is not there
    let meta = tokio::fs::metadata(local)
        .await
        .map_err(|e| SftpError::stat(local.display(), e))?;
    if !meta.is_file() && !meta.is_dir() {
        return Err(SftpError::Unsupported {
            path: local.display().to_string(),
        });
    }

    let fs = session.open_filesystem_channel().await?;
    info!(
        "Uploading {} to {} on session {}",
        local.display(),
        remote,
        session.id()
    );
    let result = upload_with(&*fs, local, remote).await;
    release(fs, result).await
}

/// Copy `remote` (file or directory) to `local` over a fresh filesystem channel
pub async fn download(
    session: &Session,
    remote: &str,
    local: &Path,
) -> Result<TransferSummary, SftpError> {
    let fs = session.open_filesystem_channel().await?;
    info!(
        "Downloading {} to {} on session {}",
        remote,
        local.display(),
        session.id()
    );
    let result = download_with(&*fs, remote, local).await;
    release(fs, result).await
}

/// Close the channel, keeping the transfer error first if there is one
async fn release(
    fs: RemoteFsHandle,
    result: Result<TransferSummary, SftpError>,
) -> Result<TransferSummary, SftpError> {
    match (result, fs.close().await) {
        (Ok(summary), Ok(())) => {
            info!(
                "Transfer complete: {} files, {} directories, {} bytes, {} skipped",
                summary.files, summary.directories, summary.bytes, summary.skipped
            );
            Ok(summary)
        }
        (Ok(_), Err(e)) => Err(SftpError::transfer(TransferOp::Close, "sftp session", e)),
        (Err(e), Err(close_err)) => {
            warn!("Failed to close sftp session after error ({}): {}", e, close_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

/// Upload using an already open [`RemoteFs`]
pub async fn upload_with(
    fs: &dyn RemoteFs,
    local: &Path,
    remote: &str,
) -> Result<TransferSummary, SftpError> {
    let meta = tokio::fs::metadata(local)
        .await
        .map_err(|e| SftpError::stat(local.display(), e))?;

    if meta.is_file() {
        let bytes = upload_file(fs, local, remote).await?;
        Ok(TransferSummary {
            files: 1,
            bytes,
            ..Default::default()
        })
    } else if meta.is_dir() {
        upload_tree(fs, local, remote).await
    } else {
        Err(SftpError::Unsupported {
            path: local.display().to_string(),
        })
    }
}

async fn upload_file(fs: &dyn RemoteFs, local: &Path, remote: &str) -> Result<u64, SftpError> {
    let src = tokio::fs::File::open(local)
        .await
        .map_err(|e| SftpError::transfer(TransferOp::Open, local.display(), e))?;
    let mut src = BufReader::new(src);
    let mut dst = fs
        .create(remote)
        .await
        .map_err(|e| SftpError::transfer(TransferOp::Create, remote, e))?;

    let bytes = match tokio::io::copy(&mut src, &mut dst).await {
        Ok(n) => n,
        Err(e) => {
            if let Err(close_err) = dst.shutdown().await {
                warn!("Failed to close {} after copy error: {}", remote, close_err);
            }
            return Err(SftpError::transfer(TransferOp::Copy, remote, e));
        }
    };

    dst.shutdown()
        .await
        .map_err(|e| SftpError::transfer(TransferOp::Close, remote, e))?;

    debug!("Uploaded {} -> {} ({} bytes)", local.display(), remote, bytes);
    Ok(bytes)
}

async fn upload_tree(
    fs: &dyn RemoteFs,
    local: &Path,
    remote: &str,
) -> Result<TransferSummary, SftpError> {
    let mut summary = TransferSummary::default();

    for node in LocalWalker::new(local) {
        let node = node?;
        let target = join_remote_relative(remote, &node.relative);

        match node.kind {
            FileType::Directory => {
                fs.mkdir_all(&target)
                    .await
                    .map_err(|e| SftpError::transfer(TransferOp::CreateDir, &target, e))?;
                summary.directories += 1;
            }
            FileType::File => {
                summary.bytes += upload_file(fs, &node.source, &target).await?;
                summary.files += 1;
            }
            FileType::Symlink | FileType::Unknown => {
                warn!(
                    "Skipping {} ({:?}): only regular files and directories are transferred",
                    node.source.display(),
                    node.kind
                );
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

/// Download using an already open [`RemoteFs`]
pub async fn download_with(
    fs: &dyn RemoteFs,
    remote: &str,
    local: &Path,
) -> Result<TransferSummary, SftpError> {
    let meta = fs
        .stat(remote)
        .await
        .map_err(|e| SftpError::stat(remote, e))?;

    match meta.file_type {
        FileType::File => {
            let bytes = download_file(fs, remote, local).await?;
            Ok(TransferSummary {
                files: 1,
                bytes,
                ..Default::default()
            })
        }
        FileType::Directory => download_tree(fs, remote, local).await,
        _ => Err(SftpError::Unsupported {
            path: remote.to_string(),
        }),
    }
}

async fn download_file(fs: &dyn RemoteFs, remote: &str, local: &Path) -> Result<u64, SftpError> {
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SftpError::transfer(TransferOp::CreateDir, parent.display(), e))?;
    }

    let mut src = fs
        .open(remote)
        .await
        .map_err(|e| SftpError::transfer(TransferOp::Open, remote, e))?;
    let mut dst = tokio::fs::File::create(local)
        .await
        .map_err(|e| SftpError::transfer(TransferOp::Create, local.display(), e))?;

    let bytes = tokio::io::copy(&mut src, &mut dst)
        .await
        .map_err(|e| SftpError::transfer(TransferOp::Copy, local.display(), e))?;

    dst.flush()
        .await
        .map_err(|e| SftpError::transfer(TransferOp::Sync, local.display(), e))?;
    dst.sync_all()
        .await
        .map_err(|e| SftpError::transfer(TransferOp::Sync, local.display(), e))?;

    debug!("Downloaded {} -> {} ({} bytes)", remote, local.display(), bytes);
    Ok(bytes)
}

async fn download_tree(
    fs: &dyn RemoteFs,
    remote: &str,
    local: &Path,
) -> Result<TransferSummary, SftpError> {
    let mut summary = TransferSummary::default();
    let mut walker = RemoteWalker::new(fs, remote);

    while let Some(node) = walker.next().await {
        let node = node?;
        let target = local.join(&node.relative);

        match node.kind {
            FileType::Directory => {
                tokio::fs::create_dir_all(&target).await.map_err(|e| {
                    SftpError::transfer(TransferOp::CreateDir, target.display(), e)
                })?;
                summary.directories += 1;
            }
            FileType::File => {
                summary.bytes += download_file(fs, &node.source, &target).await?;
                summary.files += 1;
            }
            FileType::Symlink | FileType::Unknown => {
                warn!(
                    "Skipping {} ({:?}): only regular files and directories are transferred",
                    node.source, node.kind
                );
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}
