use thiserror::Error;

use crate::storage::StorageError;
use crate::watcher::WatchError;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),
}

pub type IndexResult<T> = Result<T, IndexError>;
