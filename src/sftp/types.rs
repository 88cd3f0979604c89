//! SFTP data types

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// File type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Unknown,
}

impl FileType {
    pub fn from_std(ft: std::fs::FileType) -> Self {
        if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_dir() {
            FileType::Directory
        } else if ft.is_file() {
            FileType::File
        } else {
            FileType::Unknown
        }
    }
}

/// Counts for one finished upload or download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    /// Regular files copied
    pub files: u64,
    /// Directories created (or found already present)
    pub directories: u64,
    /// File content bytes copied
    pub bytes: u64,
    /// Symlinks and special files left out
    pub skipped: u64,
}

impl AddAssign for TransferSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.files += rhs.files;
        self.directories += rhs.directories;
        self.bytes += rhs.bytes;
        self.skipped += rhs.skipped;
    }
}
