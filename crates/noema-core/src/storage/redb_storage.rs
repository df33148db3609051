use crate::error::{NoemaError, Result};
use crate::learning::LearningEvent;
use crate::storage::records::{
    CommitBatch, LogEntry, LogOp, StorageStats, StoreState, StoredFact,
};
use crate::storage::traits::Storage;
use crate::types::{normalize_label, Entity, EntityId, Fact, FactId, FactPattern, FactStatus};
use chrono::Utc;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
    WriteTransaction,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Table definitions
const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");
const ALIASES: TableDefinition<&str, &str> = TableDefinition::new("entity_aliases");
const FACTS: TableDefinition<&str, &[u8]> = TableDefinition::new("facts");
const FACT_STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("fact_status");
const FACTS_BY_SEQ: TableDefinition<u64, &str> = TableDefinition::new("facts_by_seq");
const LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("fact_log");
const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("learning_events");

// Secondary indexes (values are fact ids)
const BY_TRIPLE: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("facts_by_triple");
const BY_SUBJECT: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("facts_by_subject");
const BY_PREDICATE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("facts_by_predicate");
const BY_OBJECT: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("facts_by_object");

// Metadata table
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";
const HIGH_WATER_KEY: &str = "log:high_water";
const GENERATION_KEY: &str = "store:generation";
const EVENT_SEQ_KEY: &str = "events:seq";

#[derive(Serialize, Deserialize)]
struct FactRow {
    seq: u64,
    fact: Fact,
}

/// Redb-based storage implementation
pub struct RedbStorage {
    db: Arc<Database>,
    path: Option<PathBuf>,
}

impl RedbStorage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                NoemaError::Validation(format!("Failed to create directory: {}", e))
            })?;
        }

        let is_new = !path.exists();
        let db = Database::create(&path)?;
        if !is_new {
            Self::check_schema_version(&db)?;
        }
        Self::init_tables(&db)?;

        Ok(Self {
            db: Arc::new(db),
            path: Some(path),
        })
    }

    /// Database backed by memory only. Contents vanish on drop.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init_tables(&db)?;
        Ok(Self {
            db: Arc::new(db),
            path: None,
        })
    }

    fn init_tables(db: &Database) -> Result<()> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTITIES)?;
            let _ = write_txn.open_table(ALIASES)?;
            let _ = write_txn.open_table(FACTS)?;
            let _ = write_txn.open_table(FACT_STATUS)?;
            let _ = write_txn.open_table(FACTS_BY_SEQ)?;
            let _ = write_txn.open_table(LOG)?;
            let _ = write_txn.open_table(EVENTS)?;
            let _ = write_txn.open_multimap_table(BY_TRIPLE)?;
            let _ = write_txn.open_multimap_table(BY_SUBJECT)?;
            let _ = write_txn.open_multimap_table(BY_PREDICATE)?;
            let _ = write_txn.open_multimap_table(BY_OBJECT)?;
            let mut meta = write_txn.open_table(META)?;
            if meta.get(SCHEMA_VERSION_KEY)?.is_none() {
                meta.insert(
                    SCHEMA_VERSION_KEY,
                    CURRENT_SCHEMA_VERSION.to_string().as_bytes(),
                )?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Check schema version. Returns error if the file was written by a
    /// different layout.
    fn check_schema_version(db: &Database) -> Result<()> {
        let read_txn = db.begin_read()?;
        let version = {
            let table = read_txn.open_table(META).ok();
            table.and_then(|t| {
                t.get(SCHEMA_VERSION_KEY).ok().flatten().and_then(|v| {
                    std::str::from_utf8(v.value())
                        .ok()
                        .and_then(|s| s.parse::<u32>().ok())
                })
            })
        };

        match version {
            None => Ok(()),
            Some(v) if v == CURRENT_SCHEMA_VERSION => Ok(()),
            Some(v) if v < CURRENT_SCHEMA_VERSION => Err(NoemaError::Validation(format!(
                "Database schema v{} is older than current v{}.",
                v, CURRENT_SCHEMA_VERSION
            ))),
            Some(v) => Err(NoemaError::Validation(format!(
                "Database schema v{} is newer than this binary v{}. Upgrade noema.",
                v, CURRENT_SCHEMA_VERSION
            ))),
        }
    }

    /// Get the database file path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(NoemaError::from)
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(NoemaError::from)
    }

    fn read_u64(table: &impl ReadableTable<&'static str, &'static [u8]>, key: &str) -> Result<u64> {
        Ok(table
            .get(key)?
            .map(|v| {
                let bytes = v.value();
                if bytes.len() == 8 {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(bytes);
                    u64::from_le_bytes(buf)
                } else {
                    0
                }
            })
            .unwrap_or(0))
    }

    fn stored_fact(
        facts: &impl ReadableTable<&'static str, &'static [u8]>,
        status: &impl ReadableTable<&'static str, &'static [u8]>,
        id: &str,
    ) -> Result<Option<StoredFact>> {
        let row = match facts.get(id)? {
            Some(bytes) => Self::deserialize::<FactRow>(bytes.value())?,
            None => return Ok(None),
        };
        let status = match status.get(id)? {
            Some(bytes) => Self::deserialize::<FactStatus>(bytes.value())?,
            None => FactStatus::Active,
        };
        Ok(Some(StoredFact {
            seq: row.seq,
            fact: row.fact,
            status,
        }))
    }

    fn multimap_ids(
        table: &impl ReadableMultimapTable<&'static str, &'static str>,
        key: &str,
    ) -> Result<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        for value in table.get(key)? {
            ids.insert(value?.value().to_string());
        }
        Ok(ids)
    }

    fn append_log(
        log: &mut redb::Table<'_, u64, &'static [u8]>,
        seq: &mut u64,
        op: LogOp,
    ) -> Result<()> {
        *seq += 1;
        let entry = LogEntry {
            seq: *seq,
            at: Utc::now(),
            op,
        };
        log.insert(*seq, Self::serialize(&entry)?.as_slice())?;
        Ok(())
    }

    fn write_entity(txn: &WriteTransaction, entity: &Entity) -> Result<()> {
        let mut entities = txn.open_table(ENTITIES)?;
        let mut aliases = txn.open_table(ALIASES)?;

        let old = entities
            .get(entity.id.as_str())?
            .map(|guard| guard.value().to_vec());
        if let Some(bytes) = old {
            let old: Entity = Self::deserialize(&bytes)?;
            for alias in old.aliases.iter().chain(std::iter::once(&old.label)) {
                let key = normalize_label(alias);
                let owned = aliases
                    .get(key.as_str())?
                    .map(|g| g.value() == entity.id.as_str())
                    .unwrap_or(false);
                if owned {
                    aliases.remove(key.as_str())?;
                }
            }
        }

        entities.insert(entity.id.as_str(), Self::serialize(entity)?.as_slice())?;
        for alias in entity.aliases.iter().chain(std::iter::once(&entity.label)) {
            let key = normalize_label(alias);
            if !key.is_empty() {
                aliases.insert(key.as_str(), entity.id.as_str())?;
            }
        }
        Ok(())
    }

    fn write_fact(txn: &WriteTransaction, seq: u64, fact: &Fact, status: &FactStatus) -> Result<()> {
        let id = fact.id.as_str();
        {
            let mut facts = txn.open_table(FACTS)?;
            if facts.get(id)?.is_some() {
                return Err(NoemaError::Validation(format!(
                    "Duplicate fact {} (version {} of {})",
                    id, fact.version, fact
                )));
            }
            let row = FactRow {
                seq,
                fact: fact.clone(),
            };
            facts.insert(id, Self::serialize(&row)?.as_slice())?;
        }
        {
            let mut statuses = txn.open_table(FACT_STATUS)?;
            statuses.insert(id, Self::serialize(status)?.as_slice())?;
        }
        {
            let mut by_seq = txn.open_table(FACTS_BY_SEQ)?;
            by_seq.insert(seq, id)?;
        }
        {
            let mut by_triple = txn.open_multimap_table(BY_TRIPLE)?;
            by_triple.insert(fact.triple_key().as_str(), id)?;
            let mut by_subject = txn.open_multimap_table(BY_SUBJECT)?;
            by_subject.insert(fact.subject.key().as_str(), id)?;
            let mut by_predicate = txn.open_multimap_table(BY_PREDICATE)?;
            by_predicate.insert(fact.predicate.as_str(), id)?;
            let mut by_object = txn.open_multimap_table(BY_OBJECT)?;
            by_object.insert(fact.object.key().as_str(), id)?;
        }
        Ok(())
    }

    fn set_status(txn: &WriteTransaction, id: &FactId, status: &FactStatus) -> Result<()> {
        let mut facts_status = txn.open_table(FACT_STATUS)?;
        {
            let facts = txn.open_table(FACTS)?;
            if facts.get(id.as_str())?.is_none() {
                return Err(NoemaError::FactNotFound(id.clone()));
            }
        }
        facts_status.insert(id.as_str(), Self::serialize(status)?.as_slice())?;
        Ok(())
    }

    fn bump_generation(meta: &mut redb::Table<'_, &'static str, &'static [u8]>) -> Result<u64> {
        let next = Self::read_u64(&*meta, GENERATION_KEY)? + 1;
        meta.insert(GENERATION_KEY, next.to_le_bytes().as_slice())?;
        Ok(next)
    }
}

impl Storage for RedbStorage {
    fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;
        match table.get(id.as_str())? {
            Some(bytes) => Ok(Some(Self::deserialize(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn entity_by_alias(&self, alias: &str) -> Result<Option<Entity>> {
        let read_txn = self.db.begin_read()?;
        let aliases = read_txn.open_table(ALIASES)?;
        let id = match aliases.get(normalize_label(alias).as_str())? {
            Some(id) => id.value().to_string(),
            None => return Ok(None),
        };
        let entities = read_txn.open_table(ENTITIES)?;
        match entities.get(id.as_str())? {
            Some(bytes) => Ok(Some(Self::deserialize(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn list_entities(&self) -> Result<Vec<Entity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            out.push(Self::deserialize(value.value())?);
        }
        Ok(out)
    }

    fn commit(&self, batch: &CommitBatch) -> Result<u64> {
        let write_txn = self.db.begin_write()?;
        let last = {
            let mut meta = write_txn.open_table(META)?;
            let mut log = write_txn.open_table(LOG)?;
            let mut seq = Self::read_u64(&meta, HIGH_WATER_KEY)?;

            for entity in &batch.entities {
                entity.validate().map_err(NoemaError::Validation)?;
                Self::write_entity(&write_txn, entity)?;
                Self::append_log(&mut log, &mut seq, LogOp::Entity { id: entity.id.clone() })?;
            }

            for fact in &batch.facts {
                Self::write_fact(&write_txn, seq + 1, fact, &FactStatus::Active)?;
                Self::append_log(&mut log, &mut seq, LogOp::Assert { fact: fact.id.clone() })?;
            }

            for (old, new) in &batch.superseded {
                Self::set_status(&write_txn, old, &FactStatus::Superseded { by: new.clone() })?;
                Self::append_log(
                    &mut log,
                    &mut seq,
                    LogOp::Supersede {
                        old: old.clone(),
                        new: new.clone(),
                    },
                )?;
            }

            let now = Utc::now();
            for id in &batch.retracted {
                Self::set_status(&write_txn, id, &FactStatus::Retracted { at: now })?;
                Self::append_log(&mut log, &mut seq, LogOp::Retract { fact: id.clone() })?;
            }

            meta.insert(HIGH_WATER_KEY, seq.to_le_bytes().as_slice())?;
            Self::bump_generation(&mut meta)?;
            seq
        };
        write_txn.commit()?;
        Ok(last)
    }

    fn get_fact(&self, id: &FactId) -> Result<Option<StoredFact>> {
        let read_txn = self.db.begin_read()?;
        let facts = read_txn.open_table(FACTS)?;
        let status = read_txn.open_table(FACT_STATUS)?;
        Self::stored_fact(&facts, &status, id.as_str())
    }

    fn versions_of(&self, triple_key: &str) -> Result<Vec<StoredFact>> {
        let read_txn = self.db.begin_read()?;
        let by_triple = read_txn.open_multimap_table(BY_TRIPLE)?;
        let facts = read_txn.open_table(FACTS)?;
        let status = read_txn.open_table(FACT_STATUS)?;

        let mut out = Vec::new();
        for id in Self::multimap_ids(&by_triple, triple_key)? {
            if let Some(row) = Self::stored_fact(&facts, &status, &id)? {
                out.push(row);
            }
        }
        out.sort_by_key(|r| r.fact.version);
        Ok(out)
    }

    fn select(&self, pattern: &FactPattern, limit: usize) -> Result<Vec<FactId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read()?;
        let facts = read_txn.open_table(FACTS)?;
        let status = read_txn.open_table(FACT_STATUS)?;
        let wanted = |id: &str| -> Result<bool> {
            if pattern.include_inactive {
                return Ok(true);
            }
            Ok(match status.get(id)? {
                Some(bytes) => Self::deserialize::<FactStatus>(bytes.value())?.is_active(),
                None => true,
            })
        };

        if pattern.is_unbounded() {
            let by_seq = read_txn.open_table(FACTS_BY_SEQ)?;
            let mut out = Vec::new();
            for item in by_seq.iter()? {
                let (_, id) = item?;
                if wanted(id.value())? {
                    if let Some(bytes) = facts.get(id.value())? {
                        let row: FactRow = Self::deserialize(bytes.value())?;
                        out.push(row.fact.id);
                    }
                }
                if out.len() >= limit {
                    break;
                }
            }
            return Ok(out);
        }

        let ids: BTreeSet<String> = match (&pattern.subject, &pattern.predicate, &pattern.object) {
            (Some(s), Some(p), Some(o)) => {
                let by_triple = read_txn.open_multimap_table(BY_TRIPLE)?;
                Self::multimap_ids(&by_triple, &crate::types::triple_key(s, p, o))?
            }
            (s, p, o) => {
                let mut sets: Vec<BTreeSet<String>> = Vec::new();
                if let Some(s) = s {
                    let t = read_txn.open_multimap_table(BY_SUBJECT)?;
                    sets.push(Self::multimap_ids(&t, &s.key())?);
                }
                if let Some(p) = p {
                    let t = read_txn.open_multimap_table(BY_PREDICATE)?;
                    sets.push(Self::multimap_ids(&t, p)?);
                }
                if let Some(o) = o {
                    let t = read_txn.open_multimap_table(BY_OBJECT)?;
                    sets.push(Self::multimap_ids(&t, &o.key())?);
                }
                // Intersect starting from the smallest set
                sets.sort_by_key(|s| s.len());
                let mut iter = sets.into_iter();
                let first = iter.next().unwrap_or_default();
                iter.fold(first, |acc, s| acc.intersection(&s).cloned().collect())
            }
        };

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if !wanted(&id)? {
                continue;
            }
            if let Some(bytes) = facts.get(id.as_str())? {
                let row: FactRow = Self::deserialize(bytes.value())?;
                rows.push((row.seq, row.fact.id));
            }
        }
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    fn get_facts(&self, ids: &[FactId]) -> Result<Vec<Option<StoredFact>>> {
        let read_txn = self.db.begin_read()?;
        let facts = read_txn.open_table(FACTS)?;
        let status = read_txn.open_table(FACT_STATUS)?;
        ids.iter()
            .map(|id| Self::stored_fact(&facts, &status, id.as_str()))
            .collect()
    }

    fn log_since(&self, after: u64, limit: usize) -> Result<Vec<LogEntry>> {
        let read_txn = self.db.begin_read()?;
        let log = read_txn.open_table(LOG)?;
        let mut out = Vec::new();
        for item in log.range((after.saturating_add(1))..)? {
            let (_, value) = item?;
            out.push(Self::deserialize(value.value())?);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn high_water(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        Self::read_u64(&meta, HIGH_WATER_KEY)
    }

    fn generation(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        Self::read_u64(&meta, GENERATION_KEY)
    }

    fn put_events(&self, events: &[LearningEvent]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EVENTS)?;
            for event in events {
                table.insert(event.id.as_str(), Self::serialize(event)?.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn pending_events(&self) -> Result<Vec<LearningEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENTS)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let event: LearningEvent = Self::deserialize(value.value())?;
            if event.is_pending() {
                out.push(event);
            }
        }
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    fn next_event_seq(&self) -> Result<u64> {
        let write_txn = self.db.begin_write()?;
        let next = {
            let mut meta = write_txn.open_table(META)?;
            let next = Self::read_u64(&meta, EVENT_SEQ_KEY)? + 1;
            meta.insert(EVENT_SEQ_KEY, next.to_le_bytes().as_slice())?;
            next
        };
        write_txn.commit()?;
        Ok(next)
    }

    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta_table = write_txn.open_table(META)?;
            meta_table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let meta_table = read_txn.open_table(META)?;

        match meta_table.get(key)? {
            Some(value) => Ok(Some(value.value().to_vec())),
            None => Ok(None),
        }
    }

    fn stats(&self) -> Result<StorageStats> {
        let read_txn = self.db.begin_read()?;
        let entities = read_txn.open_table(ENTITIES)?;
        let facts = read_txn.open_table(FACTS)?;
        let status = read_txn.open_table(FACT_STATUS)?;
        let log = read_txn.open_table(LOG)?;
        let events = read_txn.open_table(EVENTS)?;
        let meta = read_txn.open_table(META)?;

        let mut stats = StorageStats {
            entity_count: entities.iter()?.count() as u64,
            log_len: log.iter()?.count() as u64,
            generation: Self::read_u64(&meta, GENERATION_KEY)?,
            ..StorageStats::default()
        };

        let mut by_predicate: BTreeMap<String, u64> = BTreeMap::new();
        for item in facts.iter()? {
            let (key, value) = item?;
            let row: FactRow = Self::deserialize(value.value())?;
            stats.fact_count += 1;
            let st = match status.get(key.value())? {
                Some(bytes) => Self::deserialize::<FactStatus>(bytes.value())?,
                None => FactStatus::Active,
            };
            match st {
                FactStatus::Active => {
                    stats.active_facts += 1;
                    *by_predicate.entry(row.fact.predicate).or_insert(0) += 1;
                }
                FactStatus::Superseded { .. } => stats.superseded_facts += 1,
                FactStatus::Retracted { .. } => stats.retracted_facts += 1,
            }
        }
        stats.active_by_predicate = by_predicate;

        for item in events.iter()? {
            let (_, value) = item?;
            let event: LearningEvent = Self::deserialize(value.value())?;
            if event.is_pending() {
                stats.pending_events += 1;
            }
        }

        stats.db_size_bytes = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(stats)
    }

    fn export_state(&self) -> Result<StoreState> {
        // One read transaction so the image is a single point in time
        let read_txn = self.db.begin_read()?;
        let entities = read_txn.open_table(ENTITIES)?;
        let by_seq = read_txn.open_table(FACTS_BY_SEQ)?;
        let facts = read_txn.open_table(FACTS)?;
        let status = read_txn.open_table(FACT_STATUS)?;
        let events = read_txn.open_table(EVENTS)?;
        let meta = read_txn.open_table(META)?;

        let mut state = StoreState {
            high_water: Self::read_u64(&meta, HIGH_WATER_KEY)?,
            ..StoreState::default()
        };
        for item in entities.iter()? {
            let (_, value) = item?;
            state.entities.push(Self::deserialize(value.value())?);
        }
        for item in by_seq.iter()? {
            let (_, id) = item?;
            if let Some(row) = Self::stored_fact(&facts, &status, id.value())? {
                state.facts.push(row);
            }
        }
        for item in events.iter()? {
            let (_, value) = item?;
            state.events.push(Self::deserialize(value.value())?);
        }
        state.events.sort_by_key(|e: &LearningEvent| e.seq);
        Ok(state)
    }

    fn replace_state(&self, state: &StoreState) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            write_txn.delete_table(ENTITIES)?;
            write_txn.delete_table(ALIASES)?;
            write_txn.delete_table(FACTS)?;
            write_txn.delete_table(FACT_STATUS)?;
            write_txn.delete_table(FACTS_BY_SEQ)?;
            write_txn.delete_table(LOG)?;
            write_txn.delete_table(EVENTS)?;
            write_txn.delete_multimap_table(BY_TRIPLE)?;
            write_txn.delete_multimap_table(BY_SUBJECT)?;
            write_txn.delete_multimap_table(BY_PREDICATE)?;
            write_txn.delete_multimap_table(BY_OBJECT)?;

            for entity in &state.entities {
                Self::write_entity(&write_txn, entity)?;
            }

            let mut log = write_txn.open_table(LOG)?;
            let mut seq = 0u64;
            for row in &state.facts {
                Self::write_fact(&write_txn, row.seq, &row.fact, &row.status)?;
                let entry = LogEntry {
                    seq: row.seq,
                    at: row.fact.created_at,
                    op: LogOp::Assert {
                        fact: row.fact.id.clone(),
                    },
                };
                log.insert(row.seq, Self::serialize(&entry)?.as_slice())?;
                seq = seq.max(row.seq);
            }
            seq = seq.max(state.high_water);
            for row in &state.facts {
                match &row.status {
                    FactStatus::Active => {}
                    FactStatus::Superseded { by } => Self::append_log(
                        &mut log,
                        &mut seq,
                        LogOp::Supersede {
                            old: row.fact.id.clone(),
                            new: by.clone(),
                        },
                    )?,
                    FactStatus::Retracted { .. } => Self::append_log(
                        &mut log,
                        &mut seq,
                        LogOp::Retract {
                            fact: row.fact.id.clone(),
                        },
                    )?,
                }
            }

            let mut events = write_txn.open_table(EVENTS)?;
            let mut max_event_seq = 0;
            for event in &state.events {
                events.insert(event.id.as_str(), Self::serialize(event)?.as_slice())?;
                max_event_seq = max_event_seq.max(event.seq);
            }

            let mut meta = write_txn.open_table(META)?;
            meta.insert(HIGH_WATER_KEY, seq.to_le_bytes().as_slice())?;
            let event_seq = Self::read_u64(&meta, EVENT_SEQ_KEY)?.max(max_event_seq);
            meta.insert(EVENT_SEQ_KEY, event_seq.to_le_bytes().as_slice())?;
            Self::bump_generation(&mut meta)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewFact, Provenance, Term};
    use tempfile::TempDir;

    fn create_test_storage() -> (RedbStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = RedbStorage::open(&db_path).unwrap();
        (storage, temp_dir)
    }

    fn make_fact(s: &str, p: &str, o: &str, version: u32) -> Fact {
        let draft = NewFact::between(s, p, o);
        Fact {
            id: FactId::compute(&draft.subject, &draft.predicate, &draft.object, version),
            subject: draft.subject,
            predicate: draft.predicate,
            object: draft.object,
            confidence: 0.9,
            provenance: Provenance::asserted("test"),
            created_at: Utc::now(),
            version,
            supersedes: None,
        }
    }

    fn batch_with(facts: Vec<Fact>) -> CommitBatch {
        let mut labels = BTreeSet::new();
        for f in &facts {
            labels.insert(f.subject.value().to_string());
            labels.insert(f.object.value().to_string());
        }
        CommitBatch {
            entities: labels.into_iter().map(|l| Entity::new(l, "concept")).collect(),
            facts,
            ..CommitBatch::default()
        }
    }

    #[test]
    fn test_commit_and_get() {
        let (storage, _temp) = create_test_storage();
        let fact = make_fact("dog", "is-a", "mammal", 1);
        let last = storage.commit(&batch_with(vec![fact.clone()])).unwrap();
        assert_eq!(last, 3); // two entities + one assert

        let row = storage.get_fact(&fact.id).unwrap().unwrap();
        assert_eq!(row.fact, fact);
        assert_eq!(row.status, FactStatus::Active);
        assert_eq!(row.seq, 3);
        assert!(storage.get_entity(&EntityId::from_label("dog")).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_fact_rejected_and_rolled_back() {
        let (storage, _temp) = create_test_storage();
        let fact = make_fact("dog", "is-a", "mammal", 1);
        storage.commit(&batch_with(vec![fact.clone()])).unwrap();
        let before = storage.high_water().unwrap();

        let other = make_fact("cat", "is-a", "mammal", 1);
        let result = storage.commit(&batch_with(vec![other.clone(), fact]));
        assert!(result.is_err());
        // Nothing from the failed batch is visible
        assert!(storage.get_fact(&other.id).unwrap().is_none());
        assert_eq!(storage.high_water().unwrap(), before);
    }

    #[test]
    fn test_select_orders_by_insertion() {
        let (storage, _temp) = create_test_storage();
        let a = make_fact("dog", "is-a", "mammal", 1);
        let b = make_fact("cat", "is-a", "mammal", 1);
        let c = make_fact("dog", "has", "tail", 1);
        storage.commit(&batch_with(vec![a.clone(), b.clone()])).unwrap();
        storage.commit(&batch_with(vec![c.clone()])).unwrap();

        let by_pred = storage.select(&FactPattern::any().predicate("is-a"), 100).unwrap();
        assert_eq!(by_pred, vec![a.id.clone(), b.id.clone()]);

        let dog = storage
            .select(&FactPattern::any().subject(Term::entity("dog")), 100)
            .unwrap();
        assert_eq!(dog, vec![a.id.clone(), c.id.clone()]);

        let exact = storage
            .select(
                &FactPattern::any()
                    .subject(Term::entity("cat"))
                    .predicate("is-a")
                    .object(Term::entity("mammal")),
                100,
            )
            .unwrap();
        assert_eq!(exact, vec![b.id.clone()]);

        let all = storage.select(&FactPattern::any(), 2).unwrap();
        assert_eq!(all, vec![a.id, b.id]);
    }

    #[test]
    fn test_supersede_and_retract_update_status_and_log() {
        let (storage, _temp) = create_test_storage();
        let v1 = make_fact("paris", "capital-of", "france", 1);
        storage.commit(&batch_with(vec![v1.clone()])).unwrap();

        let mut v2 = make_fact("paris", "capital-of", "france", 2);
        v2.supersedes = Some(v1.id.clone());
        storage
            .commit(&CommitBatch {
                facts: vec![v2.clone()],
                superseded: vec![(v1.id.clone(), v2.id.clone())],
                ..CommitBatch::default()
            })
            .unwrap();
        assert_eq!(
            storage.get_fact(&v1.id).unwrap().unwrap().status,
            FactStatus::Superseded { by: v2.id.clone() }
        );
        let versions = storage.versions_of(&v1.triple_key()).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].fact.version, 2);

        storage
            .commit(&CommitBatch {
                retracted: vec![v2.id.clone()],
                ..CommitBatch::default()
            })
            .unwrap();
        assert!(!storage.get_fact(&v2.id).unwrap().unwrap().status.is_active());

        let log = storage.log_since(0, 100).unwrap();
        assert!(matches!(log.last().unwrap().op, LogOp::Retract { .. }));
        assert!(log.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn test_retract_missing_fact_fails() {
        let (storage, _temp) = create_test_storage();
        let ghost = make_fact("a", "is-a", "b", 1);
        let result = storage.commit(&CommitBatch {
            retracted: vec![ghost.id],
            ..CommitBatch::default()
        });
        assert!(matches!(result, Err(NoemaError::FactNotFound(_))));
    }

    #[test]
    fn test_alias_lookup_follows_relabel() {
        let (storage, _temp) = create_test_storage();
        let mut nyc = Entity::new("New York", "place").with_alias("NYC");
        storage
            .commit(&CommitBatch {
                entities: vec![nyc.clone()],
                ..CommitBatch::default()
            })
            .unwrap();
        assert_eq!(
            storage.entity_by_alias("nyc").unwrap().unwrap().id,
            EntityId::from_label("New York")
        );

        nyc.relabel("New York City");
        nyc.aliases.remove("NYC");
        storage
            .commit(&CommitBatch {
                entities: vec![nyc],
                ..CommitBatch::default()
            })
            .unwrap();
        assert!(storage.entity_by_alias("nyc").unwrap().is_none());
        assert!(storage.entity_by_alias("new york city").unwrap().is_some());
        assert!(storage.entity_by_alias("new york").unwrap().is_some());
    }

    #[test]
    fn test_select_skips_inactive_unless_asked() {
        let (storage, _temp) = create_test_storage();
        let fact = make_fact("dog", "is-a", "cat", 1);
        storage.commit(&batch_with(vec![fact.clone()])).unwrap();
        storage
            .commit(&CommitBatch {
                retracted: vec![fact.id.clone()],
                ..CommitBatch::default()
            })
            .unwrap();

        let pattern = FactPattern::any().predicate("is-a");
        assert!(storage.select(&pattern, 10).unwrap().is_empty());
        assert!(storage.select(&FactPattern::any(), 10).unwrap().is_empty());
        assert_eq!(
            storage.select(&pattern.including_inactive(), 10).unwrap(),
            vec![fact.id.clone()]
        );

        let rows = storage
            .get_facts(&[fact.id.clone(), make_fact("x", "is-a", "y", 1).id])
            .unwrap();
        assert!(rows[0].is_some());
        assert!(rows[1].is_none());
    }

    #[test]
    fn test_export_replace_roundtrip() {
        let (storage, _temp) = create_test_storage();
        storage
            .commit(&batch_with(vec![
                make_fact("dog", "is-a", "mammal", 1),
                make_fact("mammal", "is-a", "animal", 1),
            ]))
            .unwrap();
        let image = storage.export_state().unwrap();
        assert_eq!(image.facts.len(), 2);

        storage
            .commit(&batch_with(vec![make_fact("cat", "is-a", "mammal", 1)]))
            .unwrap();
        let gen_before = storage.generation().unwrap();
        storage.replace_state(&image).unwrap();

        let restored = storage.export_state().unwrap();
        assert_eq!(restored.facts, image.facts);
        assert_eq!(restored.entities.len(), image.entities.len());
        assert!(storage.generation().unwrap() > gen_before);
        assert!(storage
            .select(&FactPattern::any().subject(Term::entity("cat")), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_in_memory_backend() {
        let storage = RedbStorage::open_in_memory().unwrap();
        storage
            .commit(&batch_with(vec![make_fact("a", "is-a", "b", 1)]))
            .unwrap();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.active_facts, 1);
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.db_size_bytes, 0);
        assert_eq!(stats.active_by_predicate.get("is-a"), Some(&1));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("reopen.redb");
        let fact = make_fact("dog", "is-a", "mammal", 1);
        {
            let storage = RedbStorage::open(&db_path).unwrap();
            storage.commit(&batch_with(vec![fact.clone()])).unwrap();
        }
        let storage = RedbStorage::open(&db_path).unwrap();
        assert!(storage.get_fact(&fact.id).unwrap().is_some());
        assert_eq!(storage.high_water().unwrap(), 3);
    }
}
