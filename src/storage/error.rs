use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error in {database}: {cause}")]
    Serialization { database: String, cause: String },

    #[error("Corrupt {database} database: {cause}")]
    Corrupt { database: String, cause: String },

    #[error("Lock poisoned")]
    LockPoisoned,
}

pub type StorageResult<T> = Result<T, StorageError>;
