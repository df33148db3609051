use crate::error::Result;
use crate::learning::LearningEvent;
use crate::storage::records::{CommitBatch, LogEntry, StorageStats, StoreState, StoredFact};
use crate::types::{Entity, EntityId, FactId, FactPattern};

/// Storage trait for the knowledge base
pub trait Storage: Send + Sync {
    // === Entity Operations ===

    /// Retrieve an entity by ID
    fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>>;

    /// Resolve a normalised alias to the entity that carries it
    fn entity_by_alias(&self, alias: &str) -> Result<Option<Entity>>;

    /// All entities, ordered by id
    fn list_entities(&self) -> Result<Vec<Entity>>;

    // === Fact Operations ===

    /// Apply a batch in a single transaction and return the last log sequence
    fn commit(&self, batch: &CommitBatch) -> Result<u64>;

    /// Retrieve a fact row by ID
    fn get_fact(&self, id: &FactId) -> Result<Option<StoredFact>>;

    /// Every version ever committed for a triple key, oldest first
    fn versions_of(&self, triple_key: &str) -> Result<Vec<StoredFact>>;

    /// Ids of facts matching `pattern`, in insertion order, at most `limit`.
    /// Inactive facts are skipped unless the pattern asks for them. Resolved
    /// inside one read transaction.
    fn select(&self, pattern: &FactPattern, limit: usize) -> Result<Vec<FactId>>;

    /// Load fact rows; `None` for ids that do not exist
    fn get_facts(&self, ids: &[FactId]) -> Result<Vec<Option<StoredFact>>>;

    /// Log records with `seq > after`, at most `limit` of them
    fn log_since(&self, after: u64, limit: usize) -> Result<Vec<LogEntry>>;

    /// Highest log sequence committed so far
    fn high_water(&self) -> Result<u64>;

    /// Bumped on every commit and restore
    fn generation(&self) -> Result<u64>;

    // === Learning Events ===

    fn put_events(&self, events: &[LearningEvent]) -> Result<()>;

    fn pending_events(&self) -> Result<Vec<LearningEvent>>;

    fn next_event_seq(&self) -> Result<u64>;

    // === Metadata ===

    /// Store metadata key-value pair
    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve metadata by key
    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // === Maintenance ===

    /// Get database statistics
    fn stats(&self) -> Result<StorageStats>;

    /// Read a consistent image of the whole store
    fn export_state(&self) -> Result<StoreState>;

    /// Replace all contents with `state` in one transaction
    fn replace_state(&self, state: &StoreState) -> Result<()>;
}
