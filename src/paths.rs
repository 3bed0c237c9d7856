//! Filesystem path helpers shared across modules.

use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Canonicalize `path`, falling back to lexical normalization when the
/// file does not exist (dangling references keep a stable spelling).
pub fn canonicalize(path: &Path) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(_) => normalize(path),
    }
}

/// Purely lexical cleanup: resolves `.` and `..` components in place.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Last-modified time as seconds since the epoch; 0 for absent files.
pub fn mtime_epoch(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/// On-disk location of the saved PCH for `header` under `project_root`:
/// the hex SHA-256 of the header path.
pub fn pch_path(project_root: &Path, header: &Path) -> PathBuf {
    let digest = Sha256::digest(header.display().to_string().as_bytes());
    let mut name = String::with_capacity(64);
    for byte in digest {
        name.push_str(&format!("{byte:02x}"));
    }
    project_root.join(name)
}
