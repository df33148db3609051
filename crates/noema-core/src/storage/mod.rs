mod records;
mod redb_storage;
pub mod snapshot;
mod traits;

pub use records::{CommitBatch, LogEntry, LogOp, StorageStats, StoreState, StoredFact};
pub use redb_storage::{RedbStorage, CURRENT_SCHEMA_VERSION};
pub use snapshot::BackupHandle;
pub use traits::Storage;
