//! Ordered key-value adapter over the four index databases.
//!
//! Each database is an ordered byte map persisted as a single bincode file
//! under the project root, rewritten atomically on every committed batch.
//! The engine grants many concurrent readers (through snapshots) plus one
//! writer per database; the write handle owns the database's write tenure
//! for its lifetime.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{StorageError, StorageResult};

/// The four logical databases of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseId {
    Symbol,
    SymbolName,
    Dependency,
    FileInformation,
}

impl DatabaseId {
    pub const ALL: [DatabaseId; 4] = [
        DatabaseId::Symbol,
        DatabaseId::SymbolName,
        DatabaseId::Dependency,
        DatabaseId::FileInformation,
    ];

    /// On-disk file name under the project root.
    pub fn file_name(self) -> &'static str {
        match self {
            DatabaseId::Symbol => "symbols.db",
            DatabaseId::SymbolName => "symbol_names.db",
            DatabaseId::Dependency => "dependencies.db",
            DatabaseId::FileInformation => "file_information.db",
        }
    }
}

impl std::fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DatabaseId::Symbol => "Symbol",
            DatabaseId::SymbolName => "SymbolName",
            DatabaseId::Dependency => "Dependency",
            DatabaseId::FileInformation => "FileInformation",
        };
        f.write_str(name)
    }
}

type ByteMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// A single batched-write operation.
#[derive(Debug, Clone)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An atomic group of writes against one database.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key.into(), value));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

struct Database {
    id: DatabaseId,
    path: PathBuf,
    map: RwLock<ByteMap>,
    // Serializes write tenure: at most one open write handle per database.
    write_tenure: Mutex<()>,
}

impl Database {
    fn load(id: DatabaseId, root: &Path) -> StorageResult<Self> {
        let path = root.join(id.file_name());
        let map = if path.exists() {
            let bytes = fs::read(&path)?;
            bincode::deserialize(&bytes).map_err(|e| StorageError::Corrupt {
                database: id.to_string(),
                cause: e.to_string(),
            })?
        } else {
            ByteMap::new()
        };
        Ok(Self {
            id,
            path,
            map: RwLock::new(map),
            write_tenure: Mutex::new(()),
        })
    }

    fn persist(&self, map: &ByteMap) -> StorageResult<()> {
        let bytes = bincode::serialize(map).map_err(|e| StorageError::Serialization {
            database: self.id.to_string(),
            cause: e.to_string(),
        })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Ordered key-value store holding the four index databases.
pub struct KvStore {
    databases: [Database; 4],
}

impl KvStore {
    /// Open (and lazily create) the databases under `project_root`.
    pub fn open(project_root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(project_root)?;
        Ok(Self {
            databases: [
                Database::load(DatabaseId::Symbol, project_root)?,
                Database::load(DatabaseId::SymbolName, project_root)?,
                Database::load(DatabaseId::Dependency, project_root)?,
                Database::load(DatabaseId::FileInformation, project_root)?,
            ],
        })
    }

    fn database(&self, id: DatabaseId) -> &Database {
        match id {
            DatabaseId::Symbol => &self.databases[0],
            DatabaseId::SymbolName => &self.databases[1],
            DatabaseId::Dependency => &self.databases[2],
            DatabaseId::FileInformation => &self.databases[3],
        }
    }

    /// Open a read-only view. Reads go through snapshots and may run
    /// concurrently with a writer.
    pub fn open_read(&self, id: DatabaseId) -> ReadHandle<'_> {
        ReadHandle {
            db: self.database(id),
        }
    }

    /// Acquire the database's exclusive write tenure.
    pub fn open_write(&self, id: DatabaseId) -> StorageResult<WriteHandle<'_>> {
        let db = self.database(id);
        let tenure = db.write_tenure.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(WriteHandle { db, _tenure: tenure })
    }
}

/// Read-only handle; every read observes a consistent snapshot.
pub struct ReadHandle<'a> {
    db: &'a Database,
}

impl ReadHandle<'_> {
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let map = self.db.map.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(map.get(key).cloned())
    }

    /// Decode the value at `key`, or the type's empty value when absent.
    pub fn get_decoded<T: DeserializeOwned + Default>(&self, key: &[u8]) -> StorageResult<T> {
        match self.get(key)? {
            Some(bytes) => decode(self.db.id, &bytes),
            None => Ok(T::default()),
        }
    }

    /// Key-ordered snapshot of the whole database.
    pub fn snapshot(&self) -> StorageResult<Snapshot> {
        let map = self.db.map.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(Snapshot { map: map.clone() })
    }
}

/// Exclusive write handle. Dropping it releases the write tenure.
pub struct WriteHandle<'a> {
    db: &'a Database,
    _tenure: MutexGuard<'a, ()>,
}

impl WriteHandle<'_> {
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let map = self.db.map.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(map.get(key).cloned())
    }

    /// Decode the value at `key`, or the type's empty value when absent.
    pub fn get_decoded<T: DeserializeOwned + Default>(&self, key: &[u8]) -> StorageResult<T> {
        match self.get(key)? {
            Some(bytes) => decode(self.db.id, &bytes),
            None => Ok(T::default()),
        }
    }

    /// Key-ordered snapshot for iteration during a sweep.
    pub fn snapshot(&self) -> StorageResult<Snapshot> {
        let map = self.db.map.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(Snapshot { map: map.clone() })
    }

    /// Apply and persist `batch` atomically.
    ///
    /// The in-memory map is only replaced once the new state has reached
    /// disk, so a failed persist leaves the previous state visible.
    pub fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut map = self.db.map.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut next = map.clone();
        for op in &batch.ops {
            match op {
                BatchOp::Put(key, value) => {
                    next.insert(key.clone(), value.clone());
                }
                BatchOp::Delete(key) => {
                    next.remove(key);
                }
            }
        }
        self.db.persist(&next)?;
        *map = next;
        Ok(())
    }
}

/// An owned, key-ordered view of a database at a point in time.
pub struct Snapshot {
    map: ByteMap,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.map.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Encode a value with the store's canonical binary encoding.
pub fn encode<T: Serialize>(database: DatabaseId, value: &T) -> StorageResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::Serialization {
        database: database.to_string(),
        cause: e.to_string(),
    })
}

/// Decode a value previously written with [`encode`].
pub fn decode<T: DeserializeOwned>(database: DatabaseId, bytes: &[u8]) -> StorageResult<T> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Corrupt {
        database: database.to_string(),
        cause: e.to_string(),
    })
}
