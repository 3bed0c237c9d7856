//! Shared fixtures: scripted translation units and indexer construction.

// Each test binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ccdb::storage::{decode, DatabaseId, KvStore};
use ccdb::{
    CursorInfo, Indexer, Location, RecordingBackend, ScriptedAst, Settings,
};

pub const WAIT: Duration = Duration::from_secs(10);

pub fn settings(project_root: &Path) -> Settings {
    let mut settings = Settings::with_project_root(project_root);
    settings.indexing.parallel_threads = 4;
    settings
}

/// Indexer over a recording watch backend; returns the backend handle so
/// tests can assert on registered directories.
pub fn indexer_with(
    provider: Arc<ScriptedAst>,
    project_root: &Path,
) -> (Indexer, Arc<Mutex<Vec<PathBuf>>>) {
    let backend = RecordingBackend::new();
    let handle = backend.handle();
    let indexer = Indexer::with_backend(settings(project_root), provider, Box::new(backend))
        .expect("indexer should open");
    (indexer, handle)
}

/// Settle all queued work and flush the syncer.
pub fn settle(indexer: &Indexer) {
    assert!(indexer.drain(WAIT), "indexer did not go idle");
    assert!(indexer.sync(WAIT), "syncer did not flush");
}

pub fn read_symbol(kv: &KvStore, loc: &Location) -> Option<CursorInfo> {
    kv.open_read(DatabaseId::Symbol)
        .get(loc.store_key().as_bytes())
        .unwrap()
        .map(|bytes| decode(DatabaseId::Symbol, &bytes).unwrap())
}

pub fn read_symbol_name(kv: &KvStore, name: &str) -> std::collections::BTreeSet<Location> {
    kv.open_read(DatabaseId::SymbolName)
        .get(name.as_bytes())
        .unwrap()
        .map(|bytes| decode(DatabaseId::SymbolName, &bytes).unwrap())
        .unwrap_or_default()
}

pub fn read_dependencies(kv: &KvStore, path: &Path) -> std::collections::BTreeSet<PathBuf> {
    kv.open_read(DatabaseId::Dependency)
        .get(path.display().to_string().as_bytes())
        .unwrap()
        .map(|bytes| decode(DatabaseId::Dependency, &bytes).unwrap())
        .unwrap_or_default()
}

pub fn read_file_information(kv: &KvStore, path: &Path) -> Option<Vec<String>> {
    kv.open_read(DatabaseId::FileInformation)
        .get(path.display().to_string().as_bytes())
        .unwrap()
        .map(|bytes| decode(DatabaseId::FileInformation, &bytes).unwrap())
}

/// Byte-exact dump of one database, for whole-state comparisons.
pub fn dump(kv: &KvStore, id: DatabaseId) -> Vec<(Vec<u8>, Vec<u8>)> {
    kv.open_read(id)
        .snapshot()
        .unwrap()
        .iter()
        .map(|(k, v)| (k.to_vec(), v.to_vec()))
        .collect()
}

pub fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
