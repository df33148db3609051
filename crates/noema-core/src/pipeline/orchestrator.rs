use super::cache::ResultCache;
use super::fusion::{fuse, sanitize, Candidate, Fused};
use super::mode::{select_mode, ModeSignals};
use super::query::{describe_binding, GoalSyntax, ParsedGoal, QueryParser};
use super::request::{
    AnswerSource, PipelineRequest, PipelineResult, ProcessingMode, Stage, StageReport,
};
use super::stats::{PipelineCounters, PipelineStats};
use crate::config::PipelineConfig;
use crate::error::{NoemaError, ReasonCode, Result};
use crate::reasoning::{
    ReasoningEngine, ReasoningOutcome, ReasoningQuery, RuleTerm, TriplePattern, WorkingMemory,
};
use crate::semantic::{CacheStats, EntityMatch, Extraction, SemanticLayer};
use crate::store::KnowledgeStore;
use crate::types::{Embedding, Fact, FactId, NewFact, Provenance, Term};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Nearest entities looked up for analogy.
const ANALOGY_K: usize = 5;
/// Matches below this similarity are not reported.
const ANALOGY_MIN_SCORE: f32 = 0.2;
/// Matches this close seed working memory when nothing else does.
const ANALOGY_SEED_SCORE: f32 = 0.5;
/// Confidence of an answer built only from keywords and extracted entities.
const CONCEPT_CONFIDENCE: f32 = 0.25;
/// Conclusions listed in an answer to an open query.
const MAX_LISTED: usize = 10;

/// What the semantic and lookup stages learned about a request.
struct Analysis {
    embedding: Option<Embedding>,
    extraction: Extraction,
    goal: Option<ParsedGoal>,
    seeds: Vec<Term>,
    analogies: Vec<(String, f32)>,
    facts: Vec<Fact>,
    provider_failure: Option<NoemaError>,
}

/// Sequences the semantic layer, the knowledge store and the reasoning engine
/// into one request/response flow. Every stage is a suspension point;
/// nothing here holds a lock across an await.
pub struct Pipeline {
    store: KnowledgeStore,
    semantic: Arc<SemanticLayer>,
    reasoning: Arc<ReasoningEngine>,
    parser: QueryParser,
    config: PipelineConfig,
    cache: Mutex<ResultCache>,
    counters: PipelineCounters,
}

impl Pipeline {
    pub fn new(
        store: KnowledgeStore,
        semantic: Arc<SemanticLayer>,
        reasoning: Arc<ReasoningEngine>,
        config: PipelineConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            semantic,
            reasoning,
            parser: QueryParser::new()?,
            cache: Mutex::new(ResultCache::new(config.cache_capacity)),
            counters: PipelineCounters::default(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.cache.lock()?.stats())
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache.lock()?.clear();
        Ok(())
    }

    /// Run one request through every stage. Never fails: internal errors
    /// come back as a zero-confidence result carrying a reason code.
    pub async fn process(&self, request: PipelineRequest) -> PipelineResult {
        let started = Instant::now();
        let requested = request.mode_hint.unwrap_or(ProcessingMode::Adaptive);
        let budget = self.config.max_processing();

        let result = match tokio::time::timeout(budget, self.run(&request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                match e.reason_code() {
                    ReasonCode::InvalidInput => log::debug!("Rejected request: {}", e),
                    _ => log::warn!("Pipeline failed: {}", e),
                }
                PipelineResult::failure(requested, e.reason_code(), e.to_string())
            }
            Err(_) => {
                log::warn!("Pipeline gave up after {}ms", budget.as_millis());
                PipelineResult::failure(
                    requested,
                    ReasonCode::DeadlineExceeded,
                    format!("Processing exceeded {}ms", budget.as_millis()),
                )
            }
        };

        self.counters
            .record(&result, started.elapsed().as_millis() as u64);
        result
    }

    async fn run(&self, request: &PipelineRequest) -> Result<PipelineResult> {
        let mut stages = Vec::new();
        let text = self.validate(request)?;
        stages.push(report(Stage::Validate, true, ""));

        let key = ResultCache::key(request, self.store.generation()?);
        let cached = self.cache.lock()?.get(&key);
        if let Some(hit) = cached {
            log::debug!("Serving cached result for request {}", &key[..8]);
            return Ok(hit);
        }

        let analysis = self.analyze(text, request, &mut stages).await?;
        let semantic_available = analysis.embedding.is_some();

        let signals = ModeSignals::analyze(text)
            .with_goal(analysis.goal.is_some())
            .with_relevant_facts(!analysis.facts.is_empty())
            .with_semantic(semantic_available);
        let mode = select_mode(request.mode_hint, &signals);
        let mut degraded = analysis.provider_failure.is_some();
        let mut reason = analysis
            .provider_failure
            .as_ref()
            .map(|e| e.reason_code());
        if let Some(hint) = request.mode_hint {
            if hint != ProcessingMode::Adaptive && hint != mode {
                degraded = true;
            }
        }
        stages.push(report(
            Stage::ModeSelection,
            true,
            &format!("{} ({} relevant facts)", mode, analysis.facts.len()),
        ));

        let mut outcome: Option<ReasoningOutcome> = None;
        if mode.uses_reasoning() {
            let result = self.reason(&analysis).await?;
            stages.push(report(
                Stage::Reasoning,
                result.succeeded(),
                &format!("{} after {} firings", result.state, result.firings),
            ));
            if let Some(code) = result.failure {
                reason = Some(code);
            }
            degraded |= result.degraded;
            outcome = Some(result);
        }

        let integrated = match &outcome {
            Some(o) if o.succeeded() && self.config.integrate_derived => self.integrate(o)?,
            _ => Vec::new(),
        };
        if outcome.is_some() {
            stages.push(report(
                Stage::Integration,
                true,
                &format!("{} facts committed", integrated.len()),
            ));
        }

        let symbolic = outcome
            .as_ref()
            .and_then(|o| symbolic_candidate(o, analysis.goal.as_ref()));
        let semantic = if mode.uses_semantic() && semantic_available {
            semantic_candidate(text, &analysis)
        } else {
            None
        };
        let fused = fuse(symbolic.as_ref(), semantic.as_ref(), &self.config);
        stages.push(report(
            Stage::Fusion,
            fused.source != AnswerSource::None,
            &format!("{:?}", fused.rule),
        ));

        let result = self.finish(fused, mode, degraded, reason, outcome, integrated, &analysis, stages);
        if !result.degraded {
            self.cache.lock()?.put(key, result.clone());
        }
        Ok(result)
    }

    fn validate<'a>(&self, request: &'a PipelineRequest) -> Result<&'a str> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(NoemaError::Validation("Request text is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > self.config.max_input_chars {
            return Err(NoemaError::Validation(format!(
                "Request text has {} characters, limit is {}",
                chars, self.config.max_input_chars
            )));
        }
        Ok(text)
    }

    /// Semantic analysis and knowledge lookup. Provider failures are kept,
    /// not raised, so the request can continue symbolically.
    async fn analyze(
        &self,
        text: &str,
        request: &PipelineRequest,
        stages: &mut Vec<StageReport>,
    ) -> Result<Analysis> {
        let (embedded, extracted) = tokio::join!(self.semantic.embed(text), self.semantic.extract(text));
        let mut provider_failure = None;
        let embedding = match embedded {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("Embedding unavailable, continuing without it: {}", e);
                provider_failure = Some(e);
                None
            }
        };
        let extraction = match extracted {
            Ok(x) => x,
            Err(e) => {
                log::warn!("Extraction unavailable, continuing without it: {}", e);
                provider_failure.get_or_insert(e);
                Extraction::default()
            }
        };
        stages.push(report(
            Stage::SemanticAnalysis,
            provider_failure.is_none(),
            &format!(
                "{} entities, {} relations",
                extraction.entities.len(),
                extraction.relations.len()
            ),
        ));

        let goal = self
            .parser
            .parse(text, &extraction.relations)
            .map(|g| self.ground_goal(g))
            .transpose()?;

        let mut labels: Vec<String> = Vec::new();
        if let Some(g) = &goal {
            for term in [&g.pattern.subject, &g.pattern.object] {
                if let RuleTerm::Const(Term::Entity(id)) = term {
                    labels.push(id.as_str().to_string());
                }
            }
        }
        labels.extend(extraction.entities.iter().map(|e| e.text.clone()));
        for r in &extraction.relations {
            labels.push(r.subject.clone());
            labels.push(r.object.clone());
        }
        labels.extend(self.semantic.keywords(text));
        if let Some(last) = request.context.last() {
            labels.extend(self.semantic.keywords(last));
        }
        let mut seeds: Vec<Term> = Vec::new();
        for label in &labels {
            if let Some(entity) = self.store.resolve_label(label)? {
                let term = Term::Entity(entity.id);
                if !seeds.contains(&term) {
                    seeds.push(term);
                }
            }
        }

        let mut analogies = Vec::new();
        let grounded = !seeds.is_empty();
        if let Some(vector) = &embedding {
            for EntityMatch { entity_id, score } in self.semantic.nearest_to(vector, ANALOGY_K)? {
                if score < ANALOGY_MIN_SCORE {
                    continue;
                }
                if let Some(entity) = self.store.get_entity(&entity_id)? {
                    analogies.push((entity.label, score));
                }
                if !grounded && score >= ANALOGY_SEED_SCORE {
                    seeds.push(Term::Entity(entity_id));
                }
            }
        }

        let facts = if seeds.is_empty() {
            Vec::new()
        } else {
            let config = self.reasoning.config();
            self.store
                .neighborhood(&seeds, config.relevance_hops, config.max_working_facts)?
        };
        stages.push(report(
            Stage::KnowledgeLookup,
            true,
            &format!(
                "{} seeds, {} facts, {} analogies",
                seeds.len(),
                facts.len(),
                analogies.len()
            ),
        ));

        Ok(Analysis {
            embedding,
            extraction,
            goal,
            seeds,
            analogies,
            facts,
            provider_failure,
        })
    }

    /// Swap goal constants for the canonical entity their label or alias
    /// resolves to.
    fn ground_goal(&self, mut goal: ParsedGoal) -> Result<ParsedGoal> {
        for term in [&mut goal.pattern.subject, &mut goal.pattern.object] {
            if let RuleTerm::Const(Term::Entity(id)) = term {
                if let Some(entity) = self.store.resolve_label(id.as_str())? {
                    *id = entity.id;
                }
            }
        }
        Ok(goal)
    }

    async fn reason(&self, analysis: &Analysis) -> Result<ReasoningOutcome> {
        let memory = WorkingMemory::from_facts(&analysis.facts);
        let mut query = ReasoningQuery::new().with_seeds(analysis.seeds.clone());
        if let Some(goal) = &analysis.goal {
            query = query.with_goal(goal.pattern.clone());
        }
        self.reasoning.reason_over(memory, &query).await
    }

    /// Commit confident derived facts that are not already in the store.
    /// A fact the store rejects is skipped, not fatal.
    fn integrate(&self, outcome: &ReasoningOutcome) -> Result<Vec<FactId>> {
        let mut committed = Vec::new();
        for derived in &outcome.derived {
            if derived.confidence < self.config.integrate_threshold {
                continue;
            }
            if self
                .store
                .active_fact(&derived.subject, &derived.predicate, &derived.object)?
                .is_some()
            {
                continue;
            }
            let fact = NewFact::new(derived.subject.clone(), &derived.predicate, derived.object.clone())
                .with_confidence(derived.confidence)
                .with_provenance(Provenance::Derived {
                    rule: derived.rule.clone().unwrap_or_default(),
                    premises: derived.premises.clone(),
                });
            match self.store.put(fact) {
                Ok(id) => committed.push(id),
                Err(e @ (NoemaError::Consistency { .. } | NoemaError::Validation(_))) => {
                    log::debug!("Derived fact {} not integrated: {}", derived, e);
                }
                Err(e) => return Err(e),
            }
        }
        if !committed.is_empty() {
            log::info!("Integrated {} derived facts", committed.len());
        }
        Ok(committed)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        fused: Fused,
        mode: ProcessingMode,
        degraded: bool,
        reason: Option<ReasonCode>,
        outcome: Option<ReasoningOutcome>,
        integrated: Vec<FactId>,
        analysis: &Analysis,
        mut stages: Vec<StageReport>,
    ) -> PipelineResult {
        let (facts, trace, mut explanation) = match outcome {
            Some(o) => (o.answers, o.trace, o.explanation),
            None => Default::default(),
        };
        if mode.uses_semantic() {
            for (label, score) in &analysis.analogies {
                explanation.push(format!("Related concept: {} (similarity {:.2})", label, score));
            }
        }

        let (answer, confidence, source, reason) = if fused.answer.is_empty() {
            (
                "No answer found".to_string(),
                0.0,
                AnswerSource::None,
                reason.or(Some(ReasonCode::NoAnswer)),
            )
        } else {
            (fused.answer, sanitize(fused.confidence), fused.source, reason)
        };
        stages.push(report(
            Stage::AnswerValidation,
            source != AnswerSource::None,
            reason.map(|r| r.as_str()).unwrap_or(""),
        ));

        PipelineResult {
            answer,
            confidence,
            mode_used: mode,
            source,
            degraded,
            reason,
            facts,
            trace,
            explanation,
            integrated,
            stages,
            cached: false,
        }
    }
}

fn report(stage: Stage, ok: bool, note: &str) -> StageReport {
    StageReport {
        stage,
        ok,
        note: note.to_string(),
    }
}

/// The reasoning side's answer: goal values, a yes for a proved ground goal,
/// or the new conclusions when there was no goal.
fn symbolic_candidate(outcome: &ReasoningOutcome, goal: Option<&ParsedGoal>) -> Option<Candidate> {
    if outcome.answers.is_empty() {
        return None;
    }
    let source = if outcome.answers.iter().any(|a| a.is_derived()) {
        AnswerSource::Reasoning
    } else {
        AnswerSource::Knowledge
    };
    let candidate = match goal {
        Some(g) if g.syntax == GoalSyntax::YesNo || g.pattern.variables().is_empty() => {
            Candidate::new(format!("Yes: {}", outcome.answers[0]), outcome.confidence, source)
                .with_claims(["yes".to_string()])
        }
        Some(g) => {
            let values = goal_values(&g.pattern, outcome);
            Candidate::new(values.join(", "), outcome.confidence, source).with_claims(values)
        }
        None => {
            let listed: Vec<String> = outcome
                .answers
                .iter()
                .take(MAX_LISTED)
                .map(|a| a.to_string())
                .collect();
            Candidate::new(listed.join("; "), outcome.confidence, source).with_claims(listed)
        }
    };
    Some(candidate)
}

fn goal_values(goal: &TriplePattern, outcome: &ReasoningOutcome) -> Vec<String> {
    let mut seen = BTreeSet::new();
    outcome
        .answers
        .iter()
        .filter_map(|a| describe_binding(goal, &a.bindings))
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// The semantic side's answer: the nearest known concepts, or failing that
/// the concepts the text mentions.
fn semantic_candidate(text: &str, analysis: &Analysis) -> Option<Candidate> {
    if let Some((_, top)) = analysis.analogies.first() {
        let listed: Vec<String> = analysis
            .analogies
            .iter()
            .map(|(label, score)| format!("{} ({:.2})", label, score))
            .collect();
        let claims = analysis
            .analogies
            .iter()
            .map(|(label, _)| crate::types::normalize_label(label));
        return Some(
            Candidate::new(format!("Related concepts: {}", listed.join(", ")), *top, AnswerSource::Semantic)
                .with_claims(claims),
        );
    }

    let mut concepts: Vec<String> = analysis
        .extraction
        .entities
        .iter()
        .map(|e| e.text.clone())
        .collect();
    if concepts.is_empty() {
        concepts = crate::semantic::keywords(text);
    }
    if concepts.is_empty() {
        return None;
    }
    Some(Candidate::new(
        format!("Identified concepts: {}", concepts.join(", ")),
        CONCEPT_CONFIDENCE,
        AnswerSource::Semantic,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ReasoningConfig, SemanticConfig};
    use crate::semantic::{EmbeddingProvider, HashedEmbedding, PatternExtractor};
    use async_trait::async_trait;

    struct DownEmbedding;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedding {
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Err(NoemaError::provider("down", "connection refused"))
        }

        fn dimension(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    fn seeded_store() -> KnowledgeStore {
        let store = KnowledgeStore::open(&EngineConfig::in_memory().store).unwrap();
        for (s, p, o) in [("dog", "is-a", "mammal"), ("mammal", "is-a", "animal")] {
            store.ensure_entity(s, "concept").unwrap();
            store.ensure_entity(o, "concept").unwrap();
            store.put(NewFact::between(s, p, o)).unwrap();
        }
        store
    }

    fn pipeline_with(semantic: SemanticLayer, config: PipelineConfig) -> (KnowledgeStore, Pipeline) {
        let store = seeded_store();
        let reasoning = ReasoningEngine::from_config(&ReasoningConfig::default()).unwrap();
        let pipeline = Pipeline::new(store.clone(), Arc::new(semantic), Arc::new(reasoning), config).unwrap();
        (store, pipeline)
    }

    fn pipeline() -> (KnowledgeStore, Pipeline) {
        let semantic = SemanticLayer::from_config(&SemanticConfig::default()).unwrap();
        pipeline_with(semantic, PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_empty_request_is_a_result() {
        let (_, p) = pipeline();
        let result = p.process(PipelineRequest::new("   ")).await;
        assert_eq!(result.reason, Some(ReasonCode::InvalidInput));
        assert_eq!(result.confidence, 0.0);
        assert_eq!(p.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let semantic = SemanticLayer::from_config(&SemanticConfig::default()).unwrap();
        let config = PipelineConfig {
            max_input_chars: 10,
            ..PipelineConfig::default()
        };
        let (_, p) = pipeline_with(semantic, config);
        let result = p.process(PipelineRequest::new("a very long request indeed")).await;
        assert_eq!(result.reason, Some(ReasonCode::InvalidInput));
    }

    #[tokio::test]
    async fn test_symbolic_goal_and_integration() {
        let (store, p) = pipeline();
        let result = p
            .process(PipelineRequest::new("(dog, is-a, ?)").with_mode(ProcessingMode::Symbolic))
            .await;
        assert_eq!(result.mode_used, ProcessingMode::Symbolic);
        assert_eq!(result.answer, "mammal, animal");
        assert_eq!(result.source, AnswerSource::Reasoning);
        assert!(!result.degraded);
        assert_eq!(result.integrated.len(), 1);
        assert!(store
            .active_fact(&Term::entity("dog"), "is-a", &Term::entity("animal"))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_repeat_is_served_from_cache() {
        let semantic = SemanticLayer::from_config(&SemanticConfig::default()).unwrap();
        let config = PipelineConfig::default().with_integrate_derived(false);
        let (_, p) = pipeline_with(semantic, config);
        let request = PipelineRequest::new("(dog, is-a, ?)").with_mode(ProcessingMode::Symbolic);
        let first = p.process(request.clone()).await;
        let second = p.process(request).await;
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.answer, second.answer);
        assert_eq!(p.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_provider_outage_degrades_to_symbolic() {
        let semantic = SemanticLayer::new(
            Arc::new(DownEmbedding),
            Arc::new(PatternExtractor::new().unwrap()),
            &SemanticConfig::default(),
        );
        let (_, p) = pipeline_with(semantic, PipelineConfig::default());
        let result = p
            .process(PipelineRequest::new("(dog, is-a, ?)").with_mode(ProcessingMode::Neural))
            .await;
        assert_eq!(result.mode_used, ProcessingMode::Symbolic);
        assert!(result.degraded);
        assert_eq!(result.reason, Some(ReasonCode::ProviderUnavailable));
        assert_eq!(result.answer, "mammal, animal");
    }

    #[tokio::test]
    async fn test_hybrid_runs_both_sides() {
        let store = seeded_store();
        let semantic = SemanticLayer::new(
            Arc::new(HashedEmbedding::new(64)),
            Arc::new(PatternExtractor::new().unwrap()),
            &SemanticConfig::default(),
        );
        assert_eq!(semantic.index_entities(&store).await.unwrap(), 3);
        let p = Pipeline::new(
            store,
            Arc::new(semantic),
            Arc::new(ReasoningEngine::from_config(&ReasoningConfig::default()).unwrap()),
            PipelineConfig::default(),
        )
        .unwrap();
        let result = p
            .process(PipelineRequest::new("What is a dog?").with_mode(ProcessingMode::Hybrid))
            .await;
        assert_eq!(result.mode_used, ProcessingMode::Hybrid);
        assert!(!result.trace.is_empty());
        assert!(result.confidence > 0.0);
        assert!(result
            .stages
            .iter()
            .any(|s| s.stage == Stage::Fusion && s.ok));
    }
}
