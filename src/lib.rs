pub mod config;
pub mod indexing;
pub mod logging;
pub mod parsing;
pub mod paths;
pub mod storage;
pub mod types;
pub mod watcher;

pub use types::*;
pub use config::Settings;
pub use indexing::{IndexError, IndexResult, Indexer, JobId, Syncer};
pub use parsing::{AstProvider, CursorId, Inclusion, ParseError, ScriptedAst, TranslationUnit};
pub use storage::{DatabaseId, KvStore};
pub use watcher::{NotifyBackend, RecordingBackend, WatchBackend, WatchError};
