//! Versioned triple store with single-writer/multi-reader discipline.
//!
//! Writers (`put*`, `delete`, `restore`, entity changes) hold the exclusive
//! lock for the whole validate-check-commit sequence, so a reader never sees a
//! half-applied batch. `snapshot` takes the shared lock, which pauses writers
//! for the duration of the export.

mod consistency;
mod cursor;

pub use consistency::{ConsistencyChecker, Violation};
pub use cursor::FactCursor;

use crate::config::StoreConfig;
use crate::error::{NoemaError, Result};
use crate::learning::LearningEvent;
use crate::storage::snapshot::{self, BackupHandle};
use crate::storage::{CommitBatch, LogEntry, RedbStorage, Storage, StorageStats, StoredFact};
use crate::types::{
    triple_key, Embedding, Entity, EntityId, Fact, FactId, FactPattern, NewFact, Term,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Combined confidence of two independent pieces of evidence.
/// Never lower than either input.
pub fn corroborate(existing: f32, incoming: f32) -> f32 {
    let a = existing.clamp(0.0, 1.0);
    let b = incoming.clamp(0.0, 1.0);
    (1.0 - (1.0 - a) * (1.0 - b)).clamp(a.max(b), 1.0)
}

pub(crate) struct StoreInner {
    storage: Arc<dyn Storage>,
    config: StoreConfig,
    checker: ConsistencyChecker,
    lock: RwLock<()>,
    /// Bumped by every restore; open cursors compare against it.
    epoch: AtomicU64,
}

/// Handle to the knowledge store. Cheap to clone.
#[derive(Clone)]
pub struct KnowledgeStore {
    inner: Arc<StoreInner>,
}

impl KnowledgeStore {
    pub fn new(storage: Arc<dyn Storage>, config: StoreConfig) -> Self {
        let checker = ConsistencyChecker::new(&config);
        Self {
            inner: Arc::new(StoreInner {
                storage,
                config,
                checker,
                lock: RwLock::new(()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Open the store described by `config`.
    ///
    /// A database file that cannot be read is moved aside and the newest
    /// snapshot that verifies is restored into a fresh file. Fails only when
    /// no snapshot verifies. A database locked by another handle is an error
    /// and is left in place.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if config.in_memory {
            let storage = RedbStorage::open_in_memory()?;
            return Ok(Self::new(Arc::new(storage), config.clone()));
        }

        let db_path = config.db_path();
        match RedbStorage::open(&db_path) {
            Ok(storage) => Ok(Self::new(Arc::new(storage), config.clone())),
            Err(e @ NoemaError::Validation(_)) | Err(e @ NoemaError::Io(_)) => Err(e),
            // Held by another process: the file is live, not corrupt.
            Err(e @ NoemaError::Database(redb::DatabaseError::DatabaseAlreadyOpen)) => Err(e),
            Err(e) => {
                log::error!("Knowledge store at {:?} is unreadable: {}", db_path, e);
                let aside = db_path.with_extension(format!(
                    "redb.corrupt-{}",
                    Utc::now().timestamp_millis()
                ));
                std::fs::rename(&db_path, &aside)?;
                log::warn!("Moved unreadable database to {:?}", aside);

                let storage = RedbStorage::open(&db_path)?;
                let store = Self::new(Arc::new(storage), config.clone());
                let handle = store.restore_latest_good().map_err(|restore_err| {
                    NoemaError::StorageCorruption(format!(
                        "database unreadable ({}) and no valid snapshot: {}",
                        e, restore_err
                    ))
                })?;
                log::info!("Recovered knowledge store from snapshot {}", handle.id);
                Ok(store)
            }
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    // === Entities ===

    /// Return the entity a label resolves to, creating it when unknown.
    pub fn ensure_entity(&self, label: &str, kind: &str) -> Result<EntityId> {
        let _guard = self.inner.lock.write()?;
        if let Some(entity) = self.resolve_unlocked(label)? {
            return Ok(entity.id);
        }
        let entity = Entity::new(label.trim(), kind);
        entity.validate().map_err(NoemaError::Validation)?;
        let id = entity.id.clone();
        self.inner.storage.commit(&CommitBatch {
            entities: vec![entity],
            ..CommitBatch::default()
        })?;
        Ok(id)
    }

    /// Insert or replace an entity.
    pub fn put_entity(&self, entity: Entity) -> Result<()> {
        entity.validate().map_err(NoemaError::Validation)?;
        let _guard = self.inner.lock.write()?;
        self.inner.storage.commit(&CommitBatch {
            entities: vec![entity],
            ..CommitBatch::default()
        })?;
        Ok(())
    }

    /// Change an entity's display label. The old label stays resolvable as an
    /// alias and the cached embedding is dropped.
    pub fn relabel_entity(&self, id: &EntityId, label: &str) -> Result<Entity> {
        let _guard = self.inner.lock.write()?;
        let mut entity = self
            .inner
            .storage
            .get_entity(id)?
            .ok_or_else(|| NoemaError::EntityNotFound(id.clone()))?;
        entity.relabel(label.trim());
        entity.validate().map_err(NoemaError::Validation)?;
        self.inner.storage.commit(&CommitBatch {
            entities: vec![entity.clone()],
            ..CommitBatch::default()
        })?;
        Ok(entity)
    }

    /// Cache a computed label embedding on the entity.
    pub fn set_entity_embedding(&self, id: &EntityId, embedding: Embedding) -> Result<()> {
        let _guard = self.inner.lock.write()?;
        let mut entity = self
            .inner
            .storage
            .get_entity(id)?
            .ok_or_else(|| NoemaError::EntityNotFound(id.clone()))?;
        entity.embedding = Some(embedding);
        self.inner.storage.commit(&CommitBatch {
            entities: vec![entity],
            ..CommitBatch::default()
        })?;
        Ok(())
    }

    pub fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        let _guard = self.inner.lock.read()?;
        self.inner.storage.get_entity(id)
    }

    /// Find the entity a label or alias refers to.
    pub fn resolve_label(&self, label: &str) -> Result<Option<Entity>> {
        let _guard = self.inner.lock.read()?;
        self.resolve_unlocked(label)
    }

    fn resolve_unlocked(&self, label: &str) -> Result<Option<Entity>> {
        let id = EntityId::from_label(label);
        if id.as_str().is_empty() {
            return Ok(None);
        }
        if let Some(entity) = self.inner.storage.get_entity(&id)? {
            return Ok(Some(entity));
        }
        self.inner.storage.entity_by_alias(label)
    }

    pub fn entities(&self) -> Result<Vec<Entity>> {
        let _guard = self.inner.lock.read()?;
        self.inner.storage.list_entities()
    }

    // === Facts ===

    /// Commit one fact. See [`KnowledgeStore::assert_batch`].
    pub fn put(&self, fact: NewFact) -> Result<FactId> {
        let ids = self.put_batch(vec![fact])?;
        ids.into_iter()
            .next()
            .ok_or_else(|| NoemaError::Validation("Empty put".to_string()))
    }

    pub fn put_batch(&self, facts: Vec<NewFact>) -> Result<Vec<FactId>> {
        self.assert_batch(Vec::new(), facts)
    }

    /// Commit entities and facts atomically.
    ///
    /// Every entity a fact references must already exist or be part of
    /// `entities`. Re-asserting an active triple with identical confidence and
    /// provenance returns the existing id and writes nothing. Different
    /// evidence creates the next version, with the corroborated confidence,
    /// and supersedes the active one. Consistency checks run over the whole
    /// batch; any failure rejects all of it.
    pub fn assert_batch(&self, entities: Vec<Entity>, facts: Vec<NewFact>) -> Result<Vec<FactId>> {
        for entity in &entities {
            entity.validate().map_err(NoemaError::Validation)?;
        }
        for fact in &facts {
            fact.validate()
                .map_err(|e| NoemaError::Validation(format!("{}: {}", fact, e)))?;
        }

        let _guard = self.inner.lock.write()?;
        let storage = self.inner.storage.as_ref();

        let known: HashSet<EntityId> = entities.iter().map(|e| e.id.clone()).collect();
        for fact in &facts {
            for term in [&fact.subject, &fact.object] {
                if let Term::Entity(id) = term {
                    if !known.contains(id) && storage.get_entity(id)?.is_none() {
                        return Err(NoemaError::Validation(format!(
                            "Fact {} references unknown entity '{}'",
                            fact, id
                        )));
                    }
                }
            }
        }

        let now = Utc::now();
        let mut planned: Vec<Fact> = Vec::new();
        let mut planned_by_key: HashMap<String, usize> = HashMap::new();
        let mut superseded: Vec<(FactId, FactId)> = Vec::new();
        let mut ids = Vec::with_capacity(facts.len());

        for draft in facts {
            let confidence = draft.clipped_confidence();
            let key = triple_key(&draft.subject, &draft.predicate, &draft.object);

            // Same triple twice in one batch folds into one version
            if let Some(&index) = planned_by_key.get(&key) {
                let existing = &mut planned[index];
                if existing.confidence != confidence || existing.provenance != draft.provenance {
                    existing.confidence = corroborate(existing.confidence, confidence);
                    existing.provenance = draft.provenance;
                }
                ids.push(existing.id.clone());
                continue;
            }

            let versions = storage.versions_of(&key)?;
            let active = versions.iter().find(|v| v.status.is_active());
            if let Some(active) = active {
                if active.fact.confidence == confidence && active.fact.provenance == draft.provenance
                {
                    ids.push(active.fact.id.clone());
                    continue;
                }
            }

            let version = versions.iter().map(|v| v.fact.version).max().unwrap_or(0) + 1;
            let id = FactId::compute(&draft.subject, &draft.predicate, &draft.object, version);
            let (confidence, supersedes) = match active {
                Some(active) => {
                    superseded.push((active.fact.id.clone(), id.clone()));
                    (
                        corroborate(active.fact.confidence, confidence),
                        Some(active.fact.id.clone()),
                    )
                }
                None => (confidence, None),
            };

            planned_by_key.insert(key, planned.len());
            ids.push(id.clone());
            planned.push(Fact {
                id,
                subject: draft.subject,
                predicate: draft.predicate,
                object: draft.object,
                confidence,
                provenance: draft.provenance,
                created_at: now,
                version,
                supersedes,
            });
        }

        if planned.is_empty() && entities.is_empty() {
            return Ok(ids);
        }

        let superseded_ids: HashSet<FactId> = superseded.iter().map(|(old, _)| old.clone()).collect();
        self.inner
            .checker
            .check_batch(storage, &planned, &superseded_ids)?;

        let batch = CommitBatch {
            entities,
            facts: planned,
            superseded,
            retracted: Vec::new(),
        };
        let seq = storage.commit(&batch)?;
        log::debug!(
            "Committed {} facts ({} superseded) up to log seq {}",
            batch.facts.len(),
            batch.superseded.len(),
            seq
        );
        Ok(ids)
    }

    /// Facts matching `pattern`, lazily, in insertion order. Capped by
    /// `max_results` and by the pattern's own limit.
    pub fn get(&self, pattern: FactPattern) -> Result<FactCursor> {
        FactCursor::open(self.inner.clone(), pattern)
    }

    /// Eager form of [`KnowledgeStore::get`].
    pub fn find(&self, pattern: FactPattern) -> Result<Vec<Fact>> {
        self.get(pattern)?.collect_all()
    }

    pub fn get_fact(&self, id: &FactId) -> Result<Option<StoredFact>> {
        let _guard = self.inner.lock.read()?;
        self.inner.storage.get_fact(id)
    }

    /// The active version of a triple, if any.
    pub fn active_fact(&self, subject: &Term, predicate: &str, object: &Term) -> Result<Option<Fact>> {
        let _guard = self.inner.lock.read()?;
        let versions = self
            .inner
            .storage
            .versions_of(&triple_key(subject, predicate, object))?;
        Ok(versions
            .into_iter()
            .find(|v| v.status.is_active())
            .map(|v| v.fact))
    }

    /// Every version of a triple, oldest first.
    pub fn history(&self, subject: &Term, predicate: &str, object: &Term) -> Result<Vec<StoredFact>> {
        let _guard = self.inner.lock.read()?;
        self.inner
            .storage
            .versions_of(&triple_key(subject, predicate, object))
    }

    /// Retract the active version of a fact. The row stays for history.
    pub fn delete(&self, id: &FactId) -> Result<()> {
        let _guard = self.inner.lock.write()?;
        let row = self
            .inner
            .storage
            .get_fact(id)?
            .ok_or_else(|| NoemaError::FactNotFound(id.clone()))?;
        if !row.status.is_active() {
            return Err(NoemaError::Validation(format!(
                "Fact {} is not active and cannot be retracted",
                id
            )));
        }
        self.inner.storage.commit(&CommitBatch {
            retracted: vec![id.clone()],
            ..CommitBatch::default()
        })?;
        log::debug!("Retracted fact {}", id);
        Ok(())
    }

    /// Active facts reachable from `seeds` within `hops` subject/object steps,
    /// at most `max_facts` of them, read under one shared lock.
    pub fn neighborhood(&self, seeds: &[Term], hops: usize, max_facts: usize) -> Result<Vec<Fact>> {
        let _guard = self.inner.lock.read()?;
        let storage = self.inner.storage.as_ref();
        let cap = self.inner.config.max_results;

        let mut seen_terms: HashSet<Term> = seeds.iter().cloned().collect();
        let mut seen_facts: HashSet<FactId> = HashSet::new();
        let mut out = Vec::new();
        let mut frontier: VecDeque<(Term, usize)> = seeds.iter().map(|t| (t.clone(), 0)).collect();

        while let Some((term, depth)) = frontier.pop_front() {
            let mut ids = storage.select(&FactPattern::any().subject(term.clone()), cap)?;
            ids.extend(storage.select(&FactPattern::any().object(term.clone()), cap)?);
            for row in storage.get_facts(&ids)?.into_iter().flatten() {
                if !row.status.is_active() || !seen_facts.insert(row.fact.id.clone()) {
                    continue;
                }
                if depth + 1 < hops {
                    for next in [&row.fact.subject, &row.fact.object] {
                        if seen_terms.insert(next.clone()) {
                            frontier.push_back((next.clone(), depth + 1));
                        }
                    }
                }
                out.push((row.seq, row.fact));
                if out.len() >= max_facts {
                    frontier.clear();
                    break;
                }
            }
        }

        out.sort_by_key(|(seq, _)| *seq);
        Ok(out.into_iter().map(|(_, fact)| fact).collect())
    }

    pub fn log_since(&self, after: u64, limit: usize) -> Result<Vec<LogEntry>> {
        let _guard = self.inner.lock.read()?;
        self.inner.storage.log_since(after, limit)
    }

    /// Changes on every commit and restore.
    pub fn generation(&self) -> Result<u64> {
        let _guard = self.inner.lock.read()?;
        self.inner.storage.generation()
    }

    pub fn stats(&self) -> Result<StorageStats> {
        let _guard = self.inner.lock.read()?;
        self.inner.storage.stats()
    }

    // === Learning events ===

    pub fn put_events(&self, events: &[LearningEvent]) -> Result<()> {
        let _guard = self.inner.lock.write()?;
        self.inner.storage.put_events(events)
    }

    pub fn pending_events(&self) -> Result<Vec<LearningEvent>> {
        let _guard = self.inner.lock.read()?;
        self.inner.storage.pending_events()
    }

    pub fn next_event_seq(&self) -> Result<u64> {
        let _guard = self.inner.lock.write()?;
        self.inner.storage.next_event_seq()
    }

    // === Backup and restore ===

    /// Write a content-hashed snapshot and prune old ones.
    pub fn snapshot(&self) -> Result<BackupHandle> {
        let dir = self.inner.config.snapshot_dir();
        let handle = {
            let _guard = self.inner.lock.read()?;
            let state = self.inner.storage.export_state()?;
            snapshot::write_snapshot(&dir, &state)?
        };
        let pruned = snapshot::prune_snapshots(&dir, self.inner.config.keep_snapshots)?;
        log::info!(
            "Snapshot {} written ({}), pruned {}",
            handle.id,
            handle.content_hash,
            pruned
        );
        Ok(handle)
    }

    pub fn list_snapshots(&self) -> Result<Vec<BackupHandle>> {
        snapshot::list_snapshots(&self.inner.config.snapshot_dir())
    }

    /// Replace the whole store with a snapshot. The snapshot is verified
    /// before anything is touched; on failure the store is unchanged.
    pub fn restore(&self, handle: &BackupHandle) -> Result<()> {
        let _guard = self.inner.lock.write()?;
        let state = snapshot::read_snapshot(handle)?;
        self.inner.storage.replace_state(&state)?;
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        log::info!(
            "Restored snapshot {} ({} entities, {} facts)",
            handle.id,
            state.entities.len(),
            state.facts.len()
        );
        Ok(())
    }

    /// Restore from a snapshot file path.
    pub fn restore_path(&self, path: &Path) -> Result<BackupHandle> {
        let handle = BackupHandle::from_path(path)?;
        self.restore(&handle)?;
        Ok(handle)
    }

    /// Restore the newest snapshot that verifies, skipping corrupt ones.
    pub fn restore_latest_good(&self) -> Result<BackupHandle> {
        for handle in self.list_snapshots()? {
            match self.restore(&handle) {
                Ok(()) => return Ok(handle),
                Err(NoemaError::StorageCorruption(reason)) => {
                    log::warn!("Skipping corrupt snapshot {}: {}", handle.id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Err(NoemaError::StorageCorruption(format!(
            "No valid snapshot in {:?}",
            self.inner.config.snapshot_dir()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExclusivityRule;
    use crate::types::Provenance;
    use tempfile::TempDir;

    fn create_test_store() -> (KnowledgeStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        (KnowledgeStore::open(&config).unwrap(), temp_dir)
    }

    fn with_entities(store: &KnowledgeStore, labels: &[&str]) {
        for label in labels {
            store.ensure_entity(label, "concept").unwrap();
        }
    }

    #[test]
    fn test_second_open_leaves_live_database_in_place() {
        let (store, temp) = create_test_store();
        with_entities(&store, &["dog", "mammal"]);
        store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();

        let result = KnowledgeStore::open(store.config());
        assert!(matches!(
            result,
            Err(NoemaError::Database(redb::DatabaseError::DatabaseAlreadyOpen))
        ));

        let files: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(files.iter().all(|f| !f.contains("corrupt")), "{:?}", files);
        assert_eq!(store.stats().unwrap().active_facts, 1);
    }

    #[test]
    fn test_put_requires_entities() {
        let (store, _temp) = create_test_store();
        let result = store.put(NewFact::between("dog", "is-a", "mammal"));
        assert!(matches!(result, Err(NoemaError::Validation(_))));

        with_entities(&store, &["dog", "mammal"]);
        let id = store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();
        assert_eq!(store.get_fact(&id).unwrap().unwrap().fact.version, 1);
    }

    #[test]
    fn test_identical_put_is_idempotent() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["dog", "mammal"]);
        let fact = NewFact::between("dog", "is-a", "mammal").with_confidence(0.8);
        let a = store.put(fact.clone()).unwrap();
        let b = store.put(fact).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.stats().unwrap().fact_count, 1);
    }

    #[test]
    fn test_corroboration_supersedes_and_never_lowers() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["dog", "mammal"]);
        let first = store
            .put(NewFact::between("dog", "is-a", "mammal").with_confidence(0.6))
            .unwrap();
        let second = store
            .put(
                NewFact::between("dog", "is-a", "mammal")
                    .with_confidence(0.3)
                    .with_provenance(Provenance::asserted("other")),
            )
            .unwrap();
        assert_ne!(first, second);

        let old = store.get_fact(&first).unwrap().unwrap();
        let new = store.get_fact(&second).unwrap().unwrap();
        assert!(!old.status.is_active());
        assert_eq!(new.fact.version, 2);
        assert_eq!(new.fact.supersedes, Some(first));
        assert!(new.fact.confidence >= 0.6);

        let active = store.find(FactPattern::any().predicate("is-a")).unwrap();
        assert_eq!(active.len(), 1);
        let all = store
            .find(FactPattern::any().predicate("is-a").including_inactive())
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_confidence_is_clipped() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["a", "b"]);
        let id = store
            .put(NewFact::between("a", "related-to", "b").with_confidence(7.0))
            .unwrap();
        assert_eq!(store.get_fact(&id).unwrap().unwrap().fact.confidence, 1.0);
        assert!(store
            .put(NewFact::between("a", "related-to", "b").with_confidence(-0.1))
            .is_err());
    }

    #[test]
    fn test_contradiction_leaves_count_unchanged() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["paris", "france", "germany"]);
        store.put(NewFact::between("paris", "capital-of", "france")).unwrap();
        let before = store.stats().unwrap().fact_count;

        let result = store.put(NewFact::between("paris", "capital-of", "germany"));
        assert!(matches!(result, Err(NoemaError::Consistency { .. })));
        assert_eq!(store.stats().unwrap().fact_count, before);
    }

    #[test]
    fn test_batch_is_atomic() {
        let (store, _temp) = create_test_store();
        let entities = vec![
            Entity::new("a", "concept"),
            Entity::new("b", "concept"),
            Entity::new("c", "concept"),
        ];
        let result = store.assert_batch(
            entities,
            vec![
                NewFact::between("a", "is-a", "b"),
                NewFact::between("b", "is-a", "c"),
                NewFact::between("c", "is-a", "a"),
            ],
        );
        assert!(result.is_err());
        let stats = store.stats().unwrap();
        assert_eq!(stats.fact_count, 0);
        assert_eq!(stats.entity_count, 0);
    }

    #[test]
    fn test_cursor_is_ordered_capped_and_restartable() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..StoreConfig::default()
        }
        .with_max_results(3);
        let store = KnowledgeStore::open(&config).unwrap();
        let labels: Vec<String> = (0..5).map(|i| format!("n{}", i)).collect();
        let entities: Vec<Entity> = labels.iter().map(|l| Entity::new(l.as_str(), "concept")).collect();
        let facts: Vec<NewFact> = labels
            .iter()
            .map(|l| NewFact::new(Term::entity(l), "has", Term::literal("x")))
            .collect();
        store.assert_batch(entities, facts).unwrap();

        let mut cursor = store.get(FactPattern::any()).unwrap();
        assert_eq!(cursor.len(), 3);
        assert!(cursor.truncated());
        let first: Vec<Fact> = cursor.by_ref().map(|f| f.unwrap()).collect();
        assert_eq!(first[0].subject, Term::entity("n0"));
        assert_eq!(first[2].subject, Term::entity("n2"));

        cursor.restart().unwrap();
        let again: Vec<Fact> = cursor.map(|f| f.unwrap()).collect();
        assert_eq!(first, again);

        let limited = store.find(FactPattern::any().with_limit(2)).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_delete_is_soft() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["dog", "mammal"]);
        let id = store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();
        store.delete(&id).unwrap();
        assert!(store.find(FactPattern::any()).unwrap().is_empty());
        assert!(store.get_fact(&id).unwrap().is_some());
        assert!(store.delete(&id).is_err());

        // Re-asserting after retraction starts a new version
        let again = store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();
        assert_ne!(again, id);
        let history = store
            .history(&Term::entity("dog"), "is-a", &Term::entity("mammal"))
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["dog", "mammal", "cat"]);
        store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();
        let handle = store.snapshot().unwrap();

        store.put(NewFact::between("cat", "is-a", "mammal")).unwrap();
        assert_eq!(store.find(FactPattern::any()).unwrap().len(), 2);

        store.restore(&handle).unwrap();
        let facts = store.find(FactPattern::any()).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].subject, Term::entity("dog"));
    }

    #[test]
    fn test_restore_invalidates_open_cursor() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["dog", "mammal"]);
        store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();
        let handle = store.snapshot().unwrap();

        let mut cursor = store.get(FactPattern::any()).unwrap();
        store.restore(&handle).unwrap();
        assert!(cursor.next().unwrap().is_err());
        cursor.restart().unwrap();
        assert_eq!(cursor.map(|f| f.unwrap()).count(), 1);
    }

    #[test]
    fn test_corrupt_snapshot_leaves_store_untouched() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["dog", "mammal"]);
        let handle = store.snapshot().unwrap();
        store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();

        std::fs::write(&handle.path, b"garbage").unwrap();
        assert!(matches!(
            store.restore(&handle),
            Err(NoemaError::StorageCorruption(_))
        ));
        assert_eq!(store.find(FactPattern::any()).unwrap().len(), 1);
        assert!(store.restore_latest_good().is_err());
    }

    #[test]
    fn test_restore_latest_good_skips_corrupt() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["dog", "mammal"]);
        store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();
        let good = store.snapshot().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let bad = store.snapshot().unwrap();
        std::fs::write(&bad.path, b"garbage").unwrap();

        let restored = store.restore_latest_good().unwrap();
        assert_eq!(restored.id, good.id);
    }

    #[test]
    fn test_open_recovers_from_unreadable_database() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        {
            let store = KnowledgeStore::open(&config).unwrap();
            with_entities(&store, &["dog", "mammal"]);
            store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();
            store.snapshot().unwrap();
        }
        std::fs::write(config.db_path(), vec![0xab_u8; 8192]).unwrap();

        let store = KnowledgeStore::open(&config).unwrap();
        assert_eq!(store.find(FactPattern::any()).unwrap().len(), 1);
    }

    #[test]
    fn test_unreadable_database_without_snapshot_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        std::fs::write(config.db_path(), vec![0xab_u8; 8192]).unwrap();
        assert!(matches!(
            KnowledgeStore::open(&config),
            Err(NoemaError::StorageCorruption(_))
        ));
    }

    #[test]
    fn test_alias_resolution_and_relabel() {
        let (store, _temp) = create_test_store();
        let id = store.ensure_entity("New York", "place").unwrap();
        let renamed = store.relabel_entity(&id, "New York City").unwrap();
        assert_eq!(renamed.id, id);
        assert_eq!(store.resolve_label("new york").unwrap().unwrap().id, id);
        assert_eq!(store.resolve_label("New York City").unwrap().unwrap().id, id);
        assert_eq!(store.ensure_entity("new york", "place").unwrap(), id);
    }

    #[test]
    fn test_neighborhood_respects_hops() {
        let (store, _temp) = create_test_store();
        with_entities(&store, &["a", "b", "c", "d"]);
        store
            .put_batch(vec![
                NewFact::between("a", "link", "b"),
                NewFact::between("b", "link", "c"),
                NewFact::between("c", "link", "d"),
            ])
            .unwrap();
        let one = store.neighborhood(&[Term::entity("a")], 1, 100).unwrap();
        assert_eq!(one.len(), 1);
        let two = store.neighborhood(&[Term::entity("a")], 2, 100).unwrap();
        assert_eq!(two.len(), 2);
        let capped = store.neighborhood(&[Term::entity("a")], 5, 2).unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_disjoint_rule_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..StoreConfig::default()
        }
        .with_exclusivity(ExclusivityRule::Disjoint {
            predicate: "state".into(),
            objects: vec!["open".into(), "closed".into()],
        });
        let store = KnowledgeStore::open(&config).unwrap();
        with_entities(&store, &["door", "open", "closed"]);
        store.put(NewFact::between("door", "state", "open")).unwrap();
        assert!(store.put(NewFact::between("door", "state", "closed")).is_err());
    }
}
