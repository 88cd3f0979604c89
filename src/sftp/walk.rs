//! Tree walkers
//!
//! Both walkers yield [`TransferNode`]s depth-first in lexical order, each
//! directory before anything beneath it. The root itself comes first with an
//! empty relative path. Links met during the walk are reported as
//! [`FileType::Symlink`] and never descended into.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::error::{SftpError, TransferOp};
use super::fs::{RemoteFs, RemoteMetadata};
use super::path_utils::{is_plain_entry_name, join_remote_path};
use super::types::FileType;

/// One file or directory found while walking a source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferNode<P> {
    /// Full source path
    pub source: P,
    /// Path relative to the walk root; empty for the root itself
    pub relative: PathBuf,
    pub kind: FileType,
    /// Content length for files, 0 otherwise
    pub size: u64,
}

/// Lazy walk over a local tree
pub struct LocalWalker {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

impl LocalWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let inner = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Self { root, inner }
    }

    fn node(&self, entry: walkdir::DirEntry) -> Result<TransferNode<PathBuf>, SftpError> {
        let kind = FileType::from_std(entry.file_type());
        let size = if kind == FileType::File {
            entry
                .metadata()
                .map_err(|e| walk_error(&self.root, e))?
                .len()
        } else {
            0
        };
        let relative = entry
            .path()
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(TransferNode {
            source: entry.into_path(),
            relative,
            kind,
            size,
        })
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> SftpError {
    let path = err.path().unwrap_or(root).display().to_string();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
    SftpError::Stat { path, source }
}

impl Iterator for LocalWalker {
    type Item = Result<TransferNode<PathBuf>, SftpError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(entry) => Some(self.node(entry)),
            Err(e) => Some(Err(walk_error(&self.root, e))),
        }
    }
}

/// Lazy walk over a remote tree through a [`RemoteFs`].
///
/// Finite and not restartable. After an error it yields nothing more.
pub struct RemoteWalker<'a> {
    fs: &'a dyn RemoteFs,
    root: String,
    started: bool,
    /// Nodes still to visit, the next one on top
    pending: Vec<(String, PathBuf, RemoteMetadata)>,
}

impl<'a> RemoteWalker<'a> {
    pub fn new(fs: &'a dyn RemoteFs, root: impl Into<String>) -> Self {
        Self {
            fs,
            root: root.into(),
            started: false,
            pending: Vec::new(),
        }
    }

    pub async fn next(&mut self) -> Option<Result<TransferNode<String>, SftpError>> {
        if !self.started {
            self.started = true;
            match self.fs.stat(&self.root).await {
                Ok(meta) => self.pending.push((self.root.clone(), PathBuf::new(), meta)),
                Err(e) => return Some(Err(SftpError::stat(&self.root, e))),
            }
        }

        let (path, relative, meta) = self.pending.pop()?;

        if meta.is_dir() {
            let mut entries = match self.fs.read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) => {
                    self.pending.clear();
                    return Some(Err(SftpError::transfer(TransferOp::ReadDir, &path, e)));
                }
            };
            if let Some(bad) = entries.iter().find(|e| !is_plain_entry_name(&e.name)) {
                self.pending.clear();
                let source = io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("server returned unsafe entry name {:?}", bad.name),
                );
                return Some(Err(SftpError::transfer(TransferOp::ReadDir, &path, source)));
            }
            entries.sort_by(|a, b| b.name.cmp(&a.name));
            for entry in entries {
                self.pending.push((
                    join_remote_path(&path, &entry.name),
                    relative.join(&entry.name),
                    entry.metadata,
                ));
            }
        }

        Some(Ok(TransferNode {
            source: path,
            relative,
            kind: meta.file_type,
            size: if meta.is_file() { meta.size } else { 0 },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LocalDirFs;
    use std::fs;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("b/inner")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("a/one.txt"), b"1").unwrap();
        fs::write(root.join("b/inner/two.txt"), b"22").unwrap();
        fs::write(root.join("top.txt"), b"333").unwrap();
    }

    fn expected() -> Vec<(String, FileType)> {
        [
            ("", FileType::Directory),
            ("a", FileType::Directory),
            ("a/one.txt", FileType::File),
            ("b", FileType::Directory),
            ("b/inner", FileType::Directory),
            ("b/inner/two.txt", FileType::File),
            ("empty", FileType::Directory),
            ("top.txt", FileType::File),
        ]
        .iter()
        .map(|(p, k)| (p.to_string(), *k))
        .collect()
    }

    fn rel(p: &Path) -> String {
        p.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    #[test]
    fn test_local_walk_is_lexical_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let nodes: Vec<_> = LocalWalker::new(dir.path())
            .map(|n| n.unwrap())
            .collect();
        let seen: Vec<_> = nodes.iter().map(|n| (rel(&n.relative), n.kind)).collect();
        assert_eq!(seen, expected());

        let top = nodes.iter().find(|n| rel(&n.relative) == "top.txt").unwrap();
        assert_eq!(top.size, 3);
        assert_eq!(top.source, dir.path().join("top.txt"));
    }

    #[test]
    fn test_local_walk_of_missing_root_is_stat_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut walker = LocalWalker::new(dir.path().join("nope"));
        assert!(matches!(walker.next(), Some(Err(SftpError::Stat { .. }))));
    }

    #[tokio::test]
    async fn test_remote_walk_matches_local_order() {
        let fs = LocalDirFs::temp();
        build_tree(&fs.root().join("data"));

        let mut walker = RemoteWalker::new(&fs, "/data");
        let mut seen = Vec::new();
        while let Some(node) = walker.next().await {
            let node = node.unwrap();
            if rel(&node.relative) == "b/inner/two.txt" {
                assert_eq!(node.source, "/data/b/inner/two.txt");
                assert_eq!(node.size, 2);
            }
            seen.push((rel(&node.relative), node.kind));
        }
        assert_eq!(seen, expected());
        assert!(walker.next().await.is_none());
    }

    #[tokio::test]
    async fn test_remote_walk_of_missing_root() {
        let fs = LocalDirFs::temp();
        let mut walker = RemoteWalker::new(&fs, "/missing");

        match walker.next().await {
            Some(Err(e)) => assert!(e.is_not_found()),
            other => panic!("expected stat error, got {:?}", other),
        }
        assert!(walker.next().await.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_local_walk_reports_links_without_following() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());
        std::os::unix::fs::symlink(dir.path().join("b"), dir.path().join("link")).unwrap();

        let nodes: Vec<_> = LocalWalker::new(dir.path()).map(|n| n.unwrap()).collect();
        let link = nodes.iter().find(|n| rel(&n.relative) == "link").unwrap();
        assert_eq!(link.kind, FileType::Symlink);
        assert!(!nodes.iter().any(|n| rel(&n.relative).starts_with("link/")));
    }
}
