use crate::learning::LearningEvent;
use crate::types::{Entity, EntityId, Fact, FactId, FactStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One append-only log record. Sequence numbers start at 1 and never repeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub op: LogOp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogOp {
    Entity { id: EntityId },
    Assert { fact: FactId },
    Supersede { old: FactId, new: FactId },
    Retract { fact: FactId },
}

/// Everything one write transaction applies.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    /// Inserted or replaced entities.
    pub entities: Vec<Entity>,
    /// Newly committed facts, already versioned and identified.
    pub facts: Vec<Fact>,
    /// `(old, new)` pairs; `old` becomes superseded by `new`.
    pub superseded: Vec<(FactId, FactId)>,
    pub retracted: Vec<FactId>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.facts.is_empty()
            && self.superseded.is_empty()
            && self.retracted.is_empty()
    }
}

/// A committed fact row with its insertion sequence and current status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredFact {
    pub seq: u64,
    pub fact: Fact,
    pub status: FactStatus,
}

/// Compacted image of the whole store, as written into snapshots.
///
/// The log is not carried; restoring rebuilds it as one `Assert` per fact in
/// sequence order followed by the recorded status changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreState {
    pub entities: Vec<Entity>,
    pub facts: Vec<StoredFact>,
    pub events: Vec<LearningEvent>,
    pub high_water: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageStats {
    pub entity_count: u64,
    pub fact_count: u64,
    pub active_facts: u64,
    pub superseded_facts: u64,
    pub retracted_facts: u64,
    pub log_len: u64,
    pub pending_events: u64,
    pub active_by_predicate: BTreeMap<String, u64>,
    pub generation: u64,
    pub db_size_bytes: u64,
}
