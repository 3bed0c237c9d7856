//! Directory watching for change-driven invalidation.
//!
//! The coordinator registers the parent directory of every dependency
//! path; a backend turns filesystem activity into `directory changed`
//! notifications. Which files inside the directory actually changed is
//! decided by the coordinator against its recorded mtimes, so the backend
//! contract stays minimal: watch a directory, report the directory.

pub mod error;

pub use error::WatchError;

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use notify::{RecursiveMode, Watcher};

/// Files tracked per watched directory: `(file name, mtime epoch secs)`.
/// An mtime of 0 records a file that was absent when last observed.
pub type WatchedMap = HashMap<PathBuf, HashSet<(OsString, u64)>>;

/// Something that can watch directories and deliver change notifications.
pub trait WatchBackend: Send {
    /// Start watching `dir` (non-recursive). Idempotent per directory.
    fn watch(&mut self, dir: &Path) -> Result<(), WatchError>;
}

/// Production backend over `notify::RecommendedWatcher`.
///
/// Event paths are collapsed to their parent directory before delivery;
/// consumers re-stat the directory contents themselves.
pub struct NotifyBackend {
    watcher: notify::RecommendedWatcher,
}

impl NotifyBackend {
    /// Create a backend delivering changed directories into `sink`.
    pub fn new(sink: Sender<PathBuf>) -> Result<Self, WatchError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let mut dirs: Vec<PathBuf> = Vec::new();
                    for path in &event.paths {
                        let dir = if path.is_dir() {
                            path.clone()
                        } else {
                            match path.parent() {
                                Some(parent) => parent.to_path_buf(),
                                None => continue,
                            }
                        };
                        if !dirs.contains(&dir) {
                            dirs.push(dir);
                        }
                    }
                    for dir in dirs {
                        let _ = sink.send(dir);
                    }
                }
                Err(e) => {
                    tracing::error!("[watcher] file watch error: {e}");
                }
            }
        })?;
        Ok(Self { watcher })
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(&mut self, dir: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

/// Backend that only records which directories were registered.
///
/// Used by tests, which deliver directory events by hand and inspect the
/// registrations through the shared handle.
#[derive(Default)]
pub struct RecordingBackend {
    watched: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that stays valid after the backend is handed off.
    pub fn handle(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.watched)
    }
}

impl WatchBackend for RecordingBackend {
    fn watch(&mut self, dir: &Path) -> Result<(), WatchError> {
        let mut watched = self.watched.lock().unwrap();
        if !watched.iter().any(|d| d == dir) {
            watched.push(dir.to_path_buf());
        }
        Ok(())
    }
}
