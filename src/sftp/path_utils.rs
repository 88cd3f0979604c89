//! Remote path helpers
//!
//! Remote SFTP paths always use `/` as separator, whatever the local OS.

use std::path::{Component, Path};

/// Check if a remote SFTP path is absolute.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.is_empty() {
        component.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Join a local relative path onto a remote base, converting separators.
///
/// `.` components are dropped; an empty `relative` yields `base` unchanged.
pub fn join_remote_relative(base: &str, relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .fold(base.to_string(), |acc, name| join_remote_path(&acc, &name))
}

/// True if `name` is exactly one ordinary path component.
///
/// Directory entry names come from the server; anything with a separator,
/// `.`/`..`, a root or a drive prefix would escape the destination tree.
pub fn is_plain_entry_name(name: &str) -> bool {
    if name.contains('/') || (cfg!(windows) && name.contains('\\')) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
