use super::dbscan::{dbscan, Clustering};
use super::event::{CandidateFact, CandidateState, Interaction, LearningEvent};
use super::metrics::LearningMetrics;
use crate::config::LearningConfig;
use crate::error::{NoemaError, Result};
use crate::semantic::{ExtractedRelation, SemanticLayer};
use crate::store::KnowledgeStore;
use crate::types::{
    content_hash, ConsolidationId, Entity, FactId, LearningEventId, NewFact, Provenance, Term,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What one consolidation pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Absent when there was nothing pending.
    pub consolidation: Option<ConsolidationId>,
    pub candidates: usize,
    pub clusters: usize,
    pub noise: usize,
    pub promoted: Vec<FactId>,
    pub rejected: usize,
    pub discarded: usize,
    pub duration_ms: u64,
}

/// Where a pending candidate lives: (event index, candidate index).
type Slot = (usize, usize);

/// Turns repeated interactions into durable facts.
///
/// Interactions are recorded as events holding candidate triples. A
/// consolidation pass clusters pending candidates by embedding, and a
/// candidate seen in at least `min_support` distinct interactions is
/// committed through the store's consistency check.
pub struct LearningModule {
    store: KnowledgeStore,
    semantic: Arc<SemanticLayer>,
    config: LearningConfig,
    metrics: Mutex<LearningMetrics>,
    /// One consolidation pass at a time.
    pass: tokio::sync::Mutex<()>,
}

impl LearningModule {
    pub fn new(store: KnowledgeStore, semantic: Arc<SemanticLayer>, config: LearningConfig) -> Self {
        Self {
            store,
            semantic,
            config,
            metrics: Mutex::new(LearningMetrics::new()),
            pass: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn metrics(&self) -> Result<LearningMetrics> {
        Ok(self.metrics.lock()?.clone())
    }

    /// Record an interaction and the candidates extracted from it.
    ///
    /// Events scoring under `min_quality` are stored with their candidates
    /// discarded. When the backlog exceeds `max_pending`, the oldest pending
    /// events are discarded.
    pub async fn record_interaction(&self, interaction: Interaction) -> Result<LearningEventId> {
        if interaction.input.trim().is_empty() {
            return Err(NoemaError::Validation("Interaction input is empty".to_string()));
        }

        let extraction = self.semantic.extract(&interaction.text()).await?;
        let candidates = candidates_from(&extraction.relations);
        let quality = score(&interaction, &candidates);

        let seq = self.store.next_event_seq()?;
        let mut event = LearningEvent {
            id: LearningEvent::compute_id(&interaction, seq),
            seq,
            interaction,
            candidates,
            quality,
            recorded_at: Utc::now(),
        };
        let below_floor = event.is_pending() && quality < self.config.min_quality;
        if below_floor {
            event.discard_pending();
        }
        self.store.put_events(std::slice::from_ref(&event))?;
        log::debug!(
            "Recorded learning event {} with {} candidates (quality {:.2})",
            event.id,
            event.candidates.len(),
            quality
        );

        let evicted = self.enforce_backlog()?;
        let mut metrics = self.metrics.lock()?;
        metrics.events_recorded += 1;
        metrics.events_discarded += evicted as u64 + below_floor as u64;
        Ok(event.id)
    }

    fn enforce_backlog(&self) -> Result<usize> {
        let pending = self.store.pending_events()?;
        if pending.len() <= self.config.max_pending {
            return Ok(0);
        }
        let excess = pending.len() - self.config.max_pending;
        let evicted: Vec<LearningEvent> = pending
            .into_iter()
            .take(excess)
            .map(|mut e| {
                e.discard_pending();
                e
            })
            .collect();
        self.store.put_events(&evicted)?;
        log::warn!("Learning backlog over {}, discarded {} oldest events", self.config.max_pending, excess);
        Ok(excess)
    }

    /// Run one consolidation pass and return the number of promoted facts.
    pub async fn consolidate(&self) -> Result<usize> {
        Ok(self.run_cycle().await?.promoted.len())
    }

    /// Run one consolidation pass.
    pub async fn run_cycle(&self) -> Result<ConsolidationReport> {
        let _pass = self.pass.lock().await;
        let start = Instant::now();
        self.metrics.lock()?.reset_cycle_metrics();

        let mut events = self.store.pending_events()?;
        let slots: Vec<Slot> = events
            .iter()
            .enumerate()
            .flat_map(|(e, event)| {
                event
                    .candidates
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.is_pending())
                    .map(move |(c, _)| (e, c))
            })
            .collect();

        let mut report = ConsolidationReport {
            candidates: slots.len(),
            ..ConsolidationReport::default()
        };
        if slots.is_empty() {
            self.finish(&report, start, 0)?;
            return Ok(report);
        }

        let consolidation = consolidation_id(&events);
        report.consolidation = Some(consolidation.clone());

        let clustering = self.cluster(&events, &slots).await?;
        report.clusters = clustering.clusters;
        report.noise = clustering.noise();

        let mut touched: BTreeSet<usize> = BTreeSet::new();
        for members in clustering.members() {
            let mut by_key: BTreeMap<String, Vec<Slot>> = BTreeMap::new();
            for i in members {
                let (e, c) = slots[i];
                by_key.entry(events[e].candidates[c].key()).or_default().push((e, c));
            }
            for group in by_key.into_values() {
                let supporters: BTreeSet<usize> = group.iter().map(|(e, _)| *e).collect();
                if supporters.len() < self.config.min_support {
                    continue;
                }
                let state = self.promote(&events, &group, &consolidation).await?;
                match &state {
                    CandidateState::Promoted { fact, .. } => report.promoted.push(fact.clone()),
                    CandidateState::Rejected { .. } => report.rejected += 1,
                    _ => {}
                }
                for (e, c) in group {
                    events[e].candidates[c].state = state.clone();
                    touched.insert(e);
                }
            }
        }

        let max_age = chrono::Duration::seconds(self.config.max_event_age_secs as i64);
        let now = Utc::now();
        for (e, event) in events.iter_mut().enumerate() {
            if event.is_pending() && now - event.recorded_at >= max_age {
                report.discarded += event.candidates.iter().filter(|c| c.is_pending()).count();
                event.discard_pending();
                touched.insert(e);
            }
        }

        let changed: Vec<LearningEvent> = touched.iter().map(|e| events[*e].clone()).collect();
        self.store.put_events(&changed)?;
        let backlog = events.iter().filter(|e| e.is_pending()).count() as u64;

        self.finish(&report, start, backlog)?;
        log::info!(
            "Consolidation {}: {} candidates, {} clusters, {} promoted, {} rejected, {} discarded",
            consolidation,
            report.candidates,
            report.clusters,
            report.promoted.len(),
            report.rejected,
            report.discarded
        );
        Ok(report)
    }

    fn finish(&self, report: &ConsolidationReport, start: Instant, backlog: u64) -> Result<()> {
        let elapsed = start.elapsed();
        let mut metrics = self.metrics.lock()?;
        metrics.candidates_seen = report.candidates as u64;
        metrics.clusters = report.clusters as u64;
        metrics.promoted = report.promoted.len() as u64;
        metrics.rejected = report.rejected as u64;
        metrics.discarded = report.discarded as u64;
        metrics.finish_cycle(elapsed, backlog);
        Ok(())
    }

    /// DBSCAN over candidate embeddings, one point per pending candidate.
    async fn cluster(&self, events: &[LearningEvent], slots: &[Slot]) -> Result<Clustering> {
        let mut texts: Vec<String> = Vec::new();
        let mut text_index: HashMap<String, usize> = HashMap::new();
        let mut point_text = Vec::with_capacity(slots.len());
        for (e, c) in slots {
            let text = events[*e].candidates[*c].canonical_text();
            let next = texts.len();
            let index = *text_index.entry(text.clone()).or_insert(next);
            if index == next {
                texts.push(text);
            }
            point_text.push(index);
        }

        let vectors = self.semantic.embed_many(&texts).await.map_err(|e| {
            log::warn!("Consolidation postponed, embedding failed: {}", e);
            e
        })?;
        let points: Vec<_> = point_text.iter().map(|i| vectors[*i].clone()).collect();
        Ok(dbscan(&points, self.config.cluster_eps, self.config.min_support))
    }

    /// Commit one supported candidate. A consistency failure rejects it
    /// without failing the pass.
    async fn promote(
        &self,
        events: &[LearningEvent],
        group: &[Slot],
        consolidation: &ConsolidationId,
    ) -> Result<CandidateState> {
        let (e0, c0) = group[0];
        let sample: &CandidateFact = &events[e0].candidates[c0];

        // One piece of evidence per interaction, weighted by its outcome.
        let mut per_event: BTreeMap<usize, f32> = BTreeMap::new();
        for (e, c) in group {
            let evidence = events[*e].candidates[*c].confidence * events[*e].interaction.outcome.weight();
            let slot = per_event.entry(*e).or_insert(0.0);
            *slot = slot.max(evidence);
        }
        let confidence = per_event
            .values()
            .fold(0.0f32, |acc, v| crate::store::corroborate(acc, *v));
        let supporting: Vec<LearningEventId> = per_event.keys().map(|e| events[*e].id.clone()).collect();

        // Labels bind to whatever entity they resolve to, aliases included.
        let mut entities = Vec::new();
        let mut terms = Vec::with_capacity(2);
        for (label, kind) in [
            (&sample.subject, &sample.subject_kind),
            (&sample.object, &sample.object_kind),
        ] {
            match self.store.resolve_label(label)? {
                Some(resolved) => terms.push(Term::Entity(resolved.id)),
                None => {
                    let entity = Entity::new(label.clone(), kind.clone());
                    terms.push(Term::Entity(entity.id.clone()));
                    entities.push(entity);
                }
            }
        }
        let object = terms.pop().ok_or_else(|| {
            NoemaError::StorageCorruption("Missing object term for learned fact".to_string())
        })?;
        let subject = terms.pop().ok_or_else(|| {
            NoemaError::StorageCorruption("Missing subject term for learned fact".to_string())
        })?;
        let fact = NewFact::new(subject, &sample.predicate, object)
        .with_confidence(confidence)
        .with_provenance(Provenance::Consolidated {
            consolidation: consolidation.clone(),
            events: supporting,
        });

        match self.store.assert_batch(entities.clone(), vec![fact]) {
            Ok(ids) => {
                let id = ids.into_iter().next().ok_or_else(|| {
                    NoemaError::StorageCorruption("Commit returned no id for promoted fact".to_string())
                })?;
                for entity in &entities {
                    if let Err(e) = self.semantic.index_entity(&self.store, entity).await {
                        log::warn!("Failed to index learned entity {}: {}", entity.id, e);
                    }
                }
                log::info!("Promoted {} as {} ({} interactions)", sample, id, per_event.len());
                Ok(CandidateState::Promoted {
                    consolidation: consolidation.clone(),
                    fact: id,
                })
            }
            Err(e @ (NoemaError::Consistency { .. } | NoemaError::Validation(_))) => {
                log::info!("Rejected learned fact {}: {}", sample, e);
                Ok(CandidateState::Rejected {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Run `run_cycle` every `interval` until `shutdown` flips to true or
    /// its sender is dropped.
    pub fn spawn_consolidation(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let module = Arc::clone(self);
        tokio::spawn(async move {
            log::info!("Consolidation loop started (interval {}s)", interval.as_secs());
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
                if let Err(e) = module.run_cycle().await {
                    log::error!("Consolidation cycle failed: {}", e);
                }
            }
            log::info!("Consolidation loop stopped");
        })
    }
}

fn candidates_from(relations: &[ExtractedRelation]) -> Vec<CandidateFact> {
    let mut seen = BTreeSet::new();
    relations
        .iter()
        .map(|r| CandidateFact {
            subject: r.subject.clone(),
            subject_kind: r.subject_kind.clone(),
            predicate: r.predicate.clone(),
            object: r.object.clone(),
            object_kind: r.object_kind.clone(),
            confidence: r.confidence.clamp(0.0, 1.0),
            state: CandidateState::Pending,
        })
        .filter(|c| seen.insert(c.key()))
        .collect()
}

/// Outcome weight times mean extraction confidence.
fn score(interaction: &Interaction, candidates: &[CandidateFact]) -> f32 {
    if candidates.is_empty() {
        return 0.0;
    }
    let mean = candidates.iter().map(|c| c.confidence).sum::<f32>() / candidates.len() as f32;
    (interaction.outcome.weight() * mean).clamp(0.0, 1.0)
}

fn consolidation_id(events: &[LearningEvent]) -> ConsolidationId {
    let ids: Vec<&[u8]> = events.iter().map(|e| e.id.as_str().as_bytes()).collect();
    let stamp = Utc::now().timestamp_micros().to_le_bytes();
    let mut parts = vec![b"consolidation".as_slice(), stamp.as_slice()];
    parts.extend(ids);
    ConsolidationId(content_hash(&parts, 24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, SemanticConfig};
    use crate::learning::Outcome;
    use crate::types::FactPattern;

    fn module_with(store: KnowledgeStore, config: LearningConfig) -> LearningModule {
        let semantic = SemanticLayer::from_config(&SemanticConfig::default()).unwrap();
        LearningModule::new(store, Arc::new(semantic), config)
    }

    fn module(config: LearningConfig) -> (KnowledgeStore, LearningModule) {
        let store = KnowledgeStore::open(&EngineConfig::in_memory().store).unwrap();
        (store.clone(), module_with(store, config))
    }

    async fn record_many(module: &LearningModule, text: &str, n: usize) {
        for _ in 0..n {
            module.record_interaction(Interaction::new(text)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_repeated_interactions_promote_one_fact() {
        let (store, module) = module(LearningConfig::default().with_min_support(5));
        record_many(&module, "Paris is the capital of France.", 10).await;
        assert_eq!(store.pending_events().unwrap().len(), 10);

        assert_eq!(module.consolidate().await.unwrap(), 1);

        let facts = store
            .find(FactPattern::any().subject(Term::entity("Paris")).predicate("capital-of"))
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].object, Term::entity("France"));
        match &facts[0].provenance {
            Provenance::Consolidated { events, .. } => assert_eq!(events.len(), 10),
            other => panic!("unexpected provenance {:?}", other),
        }
        assert!(store.pending_events().unwrap().is_empty());
        assert_eq!(store.resolve_label("Paris").unwrap().unwrap().kind, "proper");

        // Nothing left to promote
        assert_eq!(module.consolidate().await.unwrap(), 0);
        let metrics = module.metrics().unwrap();
        assert_eq!(metrics.cycles, 2);
        assert_eq!(metrics.total_promoted, 1);
        assert_eq!(metrics.events_recorded, 10);
    }

    #[tokio::test]
    async fn test_insufficient_support_stays_pending() {
        let (store, module) = module(LearningConfig::default().with_min_support(5));
        record_many(&module, "Paris is the capital of France.", 4).await;

        let report = module.run_cycle().await.unwrap();
        assert!(report.promoted.is_empty());
        assert_eq!(report.candidates, 4);
        assert_eq!(store.pending_events().unwrap().len(), 4);
        assert!(store.find(FactPattern::any().predicate("capital-of")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_low_quality_events_are_discarded() {
        let (store, module) = module(LearningConfig::default());
        let id = module
            .record_interaction(
                Interaction::new("Paris is the capital of France.").with_outcome(Outcome::Negative),
            )
            .await
            .unwrap();
        assert!(!id.as_str().is_empty());
        assert!(store.pending_events().unwrap().is_empty());
        assert_eq!(module.metrics().unwrap().events_discarded, 1);
    }

    #[tokio::test]
    async fn test_contradicting_candidate_rejected() {
        let (store, module) = module(LearningConfig::default().with_min_support(3));
        store.ensure_entity("Paris", "proper").unwrap();
        store.ensure_entity("Germany", "proper").unwrap();
        store.put(NewFact::between("Paris", "capital-of", "Germany")).unwrap();

        record_many(&module, "Paris is the capital of France.", 3).await;
        let report = module.run_cycle().await.unwrap();
        assert!(report.promoted.is_empty());
        assert_eq!(report.rejected, 1);
        assert!(store.pending_events().unwrap().is_empty());
        assert!(store
            .active_fact(&Term::entity("Paris"), "capital-of", &Term::entity("France"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_alias_label_binds_to_resolved_entity() {
        let (store, module) = module(LearningConfig::default().with_min_support(5));
        let city = Entity::new("City of Paris", "place").with_alias("Paris");
        let city_id = city.id.clone();
        store.put_entity(city).unwrap();

        record_many(&module, "Paris is the capital of France.", 6).await;
        let report = module.run_cycle().await.unwrap();
        assert_eq!(report.promoted.len(), 1);
        assert_eq!(report.rejected, 0);

        let facts = store
            .find(FactPattern::any().subject(Term::Entity(city_id)).predicate("capital-of"))
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].object, Term::entity("France"));
        assert_eq!(facts[0].id, report.promoted[0]);
        assert!(store
            .find(FactPattern::any().subject(Term::entity("Paris")))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_backlog_evicts_oldest() {
        let config = LearningConfig {
            max_pending: 3,
            ..LearningConfig::default()
        };
        let (store, module) = module(config);
        record_many(&module, "Paris is the capital of France.", 5).await;

        let pending = store.pending_events().unwrap();
        assert_eq!(pending.len(), 3);
        let seqs: Vec<u64> = pending.iter().map(|e| e.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted);
        assert_eq!(module.metrics().unwrap().events_discarded, 2);
    }

    #[tokio::test]
    async fn test_stale_candidates_age_out() {
        let config = LearningConfig {
            max_event_age_secs: 0,
            ..LearningConfig::default()
        };
        let (store, module) = module(config);
        record_many(&module, "Paris is the capital of France.", 1).await;

        let report = module.run_cycle().await.unwrap();
        assert_eq!(report.discarded, 1);
        assert!(store.pending_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let (_, module) = module(LearningConfig::default());
        let err = module.record_interaction(Interaction::new("  ")).await.unwrap_err();
        assert!(matches!(err, NoemaError::Validation(_)));
    }

    #[tokio::test]
    async fn test_background_loop_promotes_and_stops() {
        let (store, module) = module(LearningConfig::default().with_min_support(2));
        let module = Arc::new(module);
        record_many(&module, "Paris is the capital of France.", 2).await;

        let (tx, rx) = watch::channel(false);
        let handle = module.spawn_consolidation(Duration::from_millis(10), rx);

        let mut promoted = false;
        for _ in 0..200 {
            if store
                .active_fact(&Term::entity("Paris"), "capital-of", &Term::entity("France"))
                .unwrap()
                .is_some()
            {
                promoted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(promoted);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
