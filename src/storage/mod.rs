pub mod error;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use kv::{decode, encode, DatabaseId, KvStore, ReadHandle, Snapshot, WriteBatch, WriteHandle};
