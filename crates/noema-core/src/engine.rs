use crate::config::EngineConfig;
use crate::error::{NoemaError, Result};
use crate::learning::{ConsolidationReport, Interaction, LearningMetrics, LearningModule};
use crate::pipeline::{Pipeline, PipelineRequest, PipelineResult, PipelineStats};
use crate::reasoning::{ReasoningEngine, RuleSet};
use crate::semantic::{CacheStats, SemanticLayer};
use crate::storage::snapshot::BackupHandle;
use crate::storage::StorageStats;
use crate::store::KnowledgeStore;
use crate::types::{Fact, FactId, FactPattern, LearningEventId, NewFact, Term};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Everything `stats()` reports, in one serialisable value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub store: StorageStats,
    pub pipeline: PipelineStats,
    pub learning: LearningMetrics,
    pub embedding_cache: CacheStats,
    pub result_cache: CacheStats,
    pub indexed_entities: usize,
    pub rules_version: String,
    pub rule_count: usize,
}

/// Embedded engine: store, semantic layer, reasoning, pipeline and learning
/// wired from one [`EngineConfig`].
///
/// # Example
/// ```rust,no_run
/// use noema_core::{Engine, EngineConfig, PipelineRequest};
///
/// # async fn run() -> noema_core::Result<()> {
/// let engine = Engine::open(EngineConfig::in_memory()).await?;
/// engine.assert("dog", "is-a", "mammal", 1.0)?;
/// let result = engine.process(PipelineRequest::new("(dog, is-a, ?)")).await;
/// println!("{} ({:.2})", result.answer, result.confidence);
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    config: EngineConfig,
    store: KnowledgeStore,
    semantic: Arc<SemanticLayer>,
    reasoning: Arc<ReasoningEngine>,
    pipeline: Pipeline,
    learning: Arc<LearningModule>,
}

impl Engine {
    /// Open the store and build every component. Entities already in the
    /// store are indexed for analogy lookup.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(NoemaError::Config(problems.join("; ")));
        }

        let store = KnowledgeStore::open(&config.store)?;
        let semantic = Arc::new(SemanticLayer::from_config(&config.semantic)?);
        let reasoning = Arc::new(ReasoningEngine::from_config(&config.reasoning)?);
        let pipeline = Pipeline::new(
            store.clone(),
            Arc::clone(&semantic),
            Arc::clone(&reasoning),
            config.pipeline.clone(),
        )?;
        let learning = Arc::new(LearningModule::new(
            store.clone(),
            Arc::clone(&semantic),
            config.learning.clone(),
        ));

        match semantic.index_entities(&store).await {
            Ok(n) => log::info!("Indexed {} entities", n),
            Err(e) => log::warn!("Entity index unavailable, analogies disabled: {}", e),
        }

        Ok(Self {
            config,
            store,
            semantic,
            reasoning,
            pipeline,
            learning,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn semantic(&self) -> &Arc<SemanticLayer> {
        &self.semantic
    }

    pub fn reasoning(&self) -> &Arc<ReasoningEngine> {
        &self.reasoning
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn learning(&self) -> &Arc<LearningModule> {
        &self.learning
    }

    /// Never fails; problems come back as a low-confidence result with a reason.
    pub async fn process(&self, request: PipelineRequest) -> PipelineResult {
        self.pipeline.process(request).await
    }

    pub fn query(&self, pattern: FactPattern) -> Result<Vec<Fact>> {
        self.store.find(pattern)
    }

    /// Assert `(subject, predicate, object)` between entities, creating any
    /// missing entity as a concept.
    pub fn assert(&self, subject: &str, predicate: &str, object: &str, confidence: f32) -> Result<FactId> {
        let fact = NewFact::new(Term::entity(subject), predicate, Term::entity(object))
            .with_confidence(confidence);
        self.assert_fact(fact)
    }

    /// Assert a prepared fact. Entity terms that do not resolve are created
    /// as concepts in the same batch.
    pub fn assert_fact(&self, fact: NewFact) -> Result<FactId> {
        let mut entities = Vec::new();
        for term in [&fact.subject, &fact.object] {
            if let Term::Entity(id) = term {
                if self.store.get_entity(id)?.is_none() {
                    entities.push(crate::types::Entity::new(id.as_str(), "concept"));
                }
            }
        }
        let ids = self.store.assert_batch(entities, vec![fact])?;
        ids.into_iter()
            .next()
            .ok_or_else(|| NoemaError::StorageCorruption("Commit returned no fact id".to_string()))
    }

    pub fn retract(&self, id: &FactId) -> Result<()> {
        self.store.delete(id)
    }

    pub async fn record_interaction(&self, interaction: Interaction) -> Result<LearningEventId> {
        self.learning.record_interaction(interaction).await
    }

    pub async fn consolidate(&self) -> Result<ConsolidationReport> {
        self.learning.run_cycle().await
    }

    pub fn snapshot(&self) -> Result<BackupHandle> {
        self.store.snapshot()
    }

    pub fn list_snapshots(&self) -> Result<Vec<BackupHandle>> {
        self.store.list_snapshots()
    }

    /// Restore from a snapshot file, then drop cached results and reindex.
    pub async fn restore(&self, path: &Path) -> Result<BackupHandle> {
        let handle = self.store.restore_path(path)?;
        self.after_restore().await?;
        Ok(handle)
    }

    pub async fn restore_latest(&self) -> Result<BackupHandle> {
        let handle = self.store.restore_latest_good()?;
        self.after_restore().await?;
        Ok(handle)
    }

    async fn after_restore(&self) -> Result<()> {
        self.pipeline.clear_cache()?;
        self.semantic.index_entities(&self.store).await?;
        Ok(())
    }

    /// Swap the active rule set and drop cached results built on the old one.
    pub fn replace_rules(&self, rules: RuleSet) -> Result<()> {
        self.reasoning.replace_rules(rules)?;
        self.pipeline.clear_cache()
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let rules = self.reasoning.rules()?;
        Ok(EngineStats {
            store: self.store.stats()?,
            pipeline: self.pipeline.stats(),
            learning: self.learning.metrics()?,
            embedding_cache: self.semantic.cache_stats()?,
            result_cache: self.pipeline.cache_stats()?,
            indexed_entities: self.semantic.indexed_entities()?,
            rules_version: rules.version().to_string(),
            rule_count: rules.rules().len(),
        })
    }

    /// Start the periodic consolidation and snapshot loops. Both stop when
    /// `shutdown` flips to true.
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(interval) = self.config.learning.consolidation_interval() {
            handles.push(self.learning.spawn_consolidation(interval, shutdown.clone()));
        }
        if let (false, Some(interval)) = (
            self.config.store.in_memory,
            self.config.store.snapshot_interval(),
        ) {
            handles.push(spawn_snapshots(self.store.clone(), interval, shutdown));
        }
        handles
    }
}

fn spawn_snapshots(
    store: KnowledgeStore,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.snapshot()).await {
                Ok(Ok(handle)) => log::info!("Snapshot written: {}", handle.id),
                Ok(Err(e)) => log::error!("Snapshot failed: {}", e),
                Err(e) => log::error!("Snapshot task panicked: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonCode;
    use crate::pipeline::ProcessingMode;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_assert_and_query() {
        let engine = Engine::open(EngineConfig::in_memory()).await.unwrap();
        let id = engine.assert("dog", "is-a", "mammal", 0.9).unwrap();
        assert!(engine.store().get_entity(&crate::types::EntityId::from_label("dog")).unwrap().is_some());

        let facts = engine.query(FactPattern::any().predicate("is-a")).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].id, id);

        engine.retract(&id).unwrap();
        assert!(engine.query(FactPattern::any().predicate("is-a")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_refused() {
        let mut config = EngineConfig::in_memory();
        config.learning.min_support = 0;
        assert!(matches!(Engine::open(config).await, Err(NoemaError::Config(_))));
    }

    #[tokio::test]
    async fn test_process_and_stats() {
        let engine = Engine::open(EngineConfig::in_memory()).await.unwrap();
        engine.assert("dog", "is-a", "mammal", 1.0).unwrap();
        engine.assert("mammal", "is-a", "animal", 1.0).unwrap();

        let result = engine
            .process(PipelineRequest::new("(dog, is-a, ?)").with_mode(ProcessingMode::Symbolic))
            .await;
        assert!(result.answer.contains("animal"));

        let empty = engine.process(PipelineRequest::new("")).await;
        assert_eq!(empty.reason, Some(ReasonCode::InvalidInput));

        let stats = engine.stats().unwrap();
        assert_eq!(stats.pipeline.total, 2);
        assert!(stats.store.active_facts >= 2);
        assert!(stats.rule_count > 0);
    }

    #[tokio::test]
    async fn test_snapshot_restore_roundtrip() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(EngineConfig::default().with_data_dir(dir.path()))
            .await
            .unwrap();
        engine.assert("paris", "capital-of", "france", 1.0).unwrap();
        let handle = engine.snapshot().unwrap();

        engine.assert("rome", "capital-of", "italy", 1.0).unwrap();
        assert_eq!(engine.query(FactPattern::any()).unwrap().len(), 2);

        engine.restore(&handle.path).await.unwrap();
        assert_eq!(engine.query(FactPattern::any()).unwrap().len(), 1);
        assert_eq!(engine.list_snapshots().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_background_loops_stop_on_shutdown() {
        let mut config = EngineConfig::in_memory();
        config.learning.consolidation_interval_secs = 1;
        let engine = Engine::open(config).await.unwrap();
        let (tx, rx) = watch::channel(false);
        let handles = engine.spawn_background(rx);
        assert_eq!(handles.len(), 1);
        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(std::time::Duration::from_secs(2), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
