//! Sweeps stale paths out of the databases, then requeues their units.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::storage::{decode, encode, DatabaseId, KvStore, StorageResult, WriteBatch};
use crate::types::{CursorInfo, Location};
use crate::{debug_event, log_event};

use super::coordinator::IndexerEvent;

/// Prunes every trace of a dirty path set from `Symbol` and `SymbolName`,
/// then dispatches reindexing for the affected translation units (PCH
/// producers first, so dependents find their headers ready).
pub(crate) struct DirtyJob {
    dirty: BTreeSet<PathBuf>,
    to_index_pch: HashMap<PathBuf, Vec<String>>,
    to_index: HashMap<PathBuf, Vec<String>>,
    kv: Arc<KvStore>,
    reindex: Sender<IndexerEvent>,
}

impl DirtyJob {
    pub(crate) fn new(
        dirty: BTreeSet<PathBuf>,
        to_index_pch: HashMap<PathBuf, Vec<String>>,
        to_index: HashMap<PathBuf, Vec<String>>,
        kv: Arc<KvStore>,
        reindex: Sender<IndexerEvent>,
    ) -> Self {
        Self {
            dirty,
            to_index_pch,
            to_index,
            kv,
            reindex,
        }
    }

    pub(crate) fn run(self) {
        debug_event!("dirty", "sweeping", "{} paths", self.dirty.len());
        if let Err(e) = self.sweep_symbols() {
            log_event!("dirty", "symbol sweep failed", "{e}");
        }
        if let Err(e) = self.sweep_symbol_names() {
            log_event!("dirty", "symbol-name sweep failed", "{e}");
        }
        for (input, args) in &self.to_index_pch {
            let _ = self.reindex.send(IndexerEvent::Reindex {
                input: input.clone(),
                args: args.clone(),
            });
        }
        for (input, args) in &self.to_index {
            let _ = self.reindex.send(IndexerEvent::Reindex {
                input: input.clone(),
                args: args.clone(),
            });
        }
    }

    fn sweep_symbols(&self) -> StorageResult<()> {
        let db = self.kv.open_write(DatabaseId::Symbol)?;
        let snapshot = db.snapshot()?;
        let mut batch = WriteBatch::new();
        for (key, value) in snapshot.iter() {
            let key_str = String::from_utf8_lossy(key);
            let Some(path) = Location::path_of_key(&key_str) else {
                continue;
            };
            if self.dirty.contains(&path) {
                batch.delete(key.to_vec());
                continue;
            }
            let mut info: CursorInfo = match decode(DatabaseId::Symbol, value) {
                Ok(info) => info,
                Err(e) => {
                    log_event!("dirty", "undecodable symbol entry", "{key_str}: {e}");
                    continue;
                }
            };
            if info.dirty(&self.dirty) {
                if info.is_empty() {
                    batch.delete(key.to_vec());
                } else {
                    batch.put(key.to_vec(), encode(DatabaseId::Symbol, &info)?);
                }
            }
        }
        db.commit(batch)
    }

    fn sweep_symbol_names(&self) -> StorageResult<()> {
        let db = self.kv.open_write(DatabaseId::SymbolName)?;
        let snapshot = db.snapshot()?;
        let mut batch = WriteBatch::new();
        for (key, value) in snapshot.iter() {
            let mut locations: BTreeSet<Location> = match decode(DatabaseId::SymbolName, value)
            {
                Ok(locations) => locations,
                Err(e) => {
                    log_event!(
                        "dirty",
                        "undecodable symbol-name entry",
                        "{}: {e}",
                        String::from_utf8_lossy(key)
                    );
                    continue;
                }
            };
            let before = locations.len();
            locations.retain(|loc| !self.dirty.contains(&loc.path));
            if locations.len() != before {
                if locations.is_empty() {
                    batch.delete(key.to_vec());
                } else {
                    batch.put(key.to_vec(), encode(DatabaseId::SymbolName, &locations)?);
                }
            }
        }
        db.commit(batch)
    }
}
