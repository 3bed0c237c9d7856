pub mod coordinator;
pub mod error;
pub mod pool;
pub mod syncer;

mod dirty;
mod job;

pub use coordinator::{Indexer, JobId};
pub use error::{IndexError, IndexResult};
pub use syncer::Syncer;
