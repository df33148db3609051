use super::backward::{BackwardChainer, Support};
use super::forward::{forward_chain, ForwardLimits};
use super::memory::{Origin, WorkingFact, WorkingMemory};
use super::rule::{RuleTerm, TriplePattern};
use super::ruleset::RuleSet;
use super::solver::{BoundsSolver, ConstraintProblem, ConstraintSolver};
use super::trace::{ReasoningTrace, SolverVerdict, TraceStep};
use super::unify::{match_triple, Bindings};
use crate::config::ReasoningConfig;
use crate::error::{NoemaError, ReasonCode, Result};
use crate::store::KnowledgeStore;
use crate::types::{FactId, FactPattern, Term};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasoningState {
    Init,
    ForwardChain,
    BackwardChain,
    ConstraintCheck,
    Explain,
    Done,
    Failed,
}

impl ReasoningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReasoningState::Done | ReasoningState::Failed)
    }

    fn can_advance_to(&self, next: ReasoningState) -> bool {
        use ReasoningState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Init, ForwardChain)
                | (ForwardChain, BackwardChain)
                | (ForwardChain, ConstraintCheck)
                | (BackwardChain, ConstraintCheck)
                | (ConstraintCheck, Explain)
                | (Explain, Done)
        )
    }
}

impl fmt::Display for ReasoningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReasoningState::Init => "INIT",
            ReasoningState::ForwardChain => "FORWARD_CHAIN",
            ReasoningState::BackwardChain => "BACKWARD_CHAIN",
            ReasoningState::ConstraintCheck => "CONSTRAINT_CHECK",
            ReasoningState::Explain => "EXPLAIN",
            ReasoningState::Done => "DONE",
            ReasoningState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Tracks one invocation's progress and rejects illegal transitions.
#[derive(Debug, Clone)]
struct StateMachine {
    history: Vec<ReasoningState>,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            history: vec![ReasoningState::Init],
        }
    }

    fn current(&self) -> ReasoningState {
        self.history
            .last()
            .copied()
            .unwrap_or(ReasoningState::Init)
    }

    fn advance(&mut self, next: ReasoningState) -> Result<()> {
        let current = self.current();
        if !current.can_advance_to(next) {
            return Err(NoemaError::Validation(format!(
                "Illegal reasoning transition {} -> {}",
                current, next
            )));
        }
        self.history.push(next);
        Ok(())
    }
}

/// What to reason about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningQuery {
    /// Terms whose neighbourhood forms working memory. Empty means the
    /// whole store, up to the working fact cap.
    pub seeds: Vec<Term>,
    /// Goal for backward chaining; forward chaining only when absent.
    pub goal: Option<TriplePattern>,
}

impl ReasoningQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seeds(mut self, seeds: Vec<Term>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Set the goal; its fixed subject and object join the seeds.
    pub fn with_goal(mut self, goal: TriplePattern) -> Self {
        for term in [&goal.subject, &goal.object] {
            if let RuleTerm::Const(c) = term {
                if !self.seeds.contains(c) {
                    self.seeds.push(c.clone());
                }
            }
        }
        self.goal = Some(goal);
        self
    }
}

/// A conclusion or goal answer with its support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub fact_id: FactId,
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
    pub confidence: f32,
    /// Goal variable values, empty for forward-only conclusions.
    pub bindings: Bindings,
    /// Rule that produced it; `None` for stored facts.
    pub rule: Option<String>,
    pub premises: Vec<FactId>,
}

impl Answer {
    fn from_working(fact: &WorkingFact, bindings: Bindings) -> Self {
        let (rule, premises) = match &fact.origin {
            Origin::Derived { rule, premises } => (Some(rule.clone()), premises.clone()),
            Origin::Stored => (None, Vec::new()),
        };
        Self {
            fact_id: fact.id.clone(),
            subject: fact.subject.clone(),
            predicate: fact.predicate.clone(),
            object: fact.object.clone(),
            confidence: fact.confidence,
            bindings,
            rule,
            premises,
        }
    }

    pub fn is_derived(&self) -> bool {
        self.rule.is_some()
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

/// Everything one invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningOutcome {
    /// `Done` or `Failed`.
    pub state: ReasoningState,
    /// Every state visited, starting with `Init`.
    pub states: Vec<ReasoningState>,
    pub failure: Option<ReasonCode>,
    /// Goal answers, or every new conclusion when there was no goal.
    pub answers: Vec<Answer>,
    /// New conclusions that survived the constraint check.
    pub derived: Vec<Answer>,
    pub trace: ReasoningTrace,
    pub explanation: Vec<String>,
    /// Best answer confidence after any degradation penalty.
    pub confidence: f32,
    /// A fallback path was taken (solver timeout or error, exhaustion,
    /// depth limit).
    pub degraded: bool,
    pub firings: usize,
    pub working_facts: usize,
    pub rules_version: String,
}

impl ReasoningOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == ReasoningState::Done
    }
}

/// Rule-based forward/backward chaining plus solver checks over a
/// relevance-scoped slice of the knowledge store.
pub struct ReasoningEngine {
    rules: RwLock<Arc<RuleSet>>,
    solver: Arc<dyn ConstraintSolver>,
    config: ReasoningConfig,
}

impl ReasoningEngine {
    pub fn new(rules: RuleSet, solver: Arc<dyn ConstraintSolver>, config: ReasoningConfig) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            solver,
            config,
        }
    }

    /// Rules from `rules_path`, or the built-in set, with the bounds solver.
    pub fn from_config(config: &ReasoningConfig) -> Result<Self> {
        let rules = match &config.rules_path {
            Some(path) => RuleSet::load(path)?,
            None => RuleSet::builtin()?,
        };
        log::info!(
            "Loaded {} rules and {} constraints (version {})",
            rules.len(),
            rules.constraints().len(),
            rules.version()
        );
        Ok(Self::new(rules, Arc::new(BoundsSolver), config.clone()))
    }

    pub fn with_solver(mut self, solver: Arc<dyn ConstraintSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    pub fn rules(&self) -> Result<Arc<RuleSet>> {
        Ok(self.rules.read()?.clone())
    }

    /// Administrative swap of the whole rule set. Invocations already
    /// running keep the set they started with.
    pub fn replace_rules(&self, rules: RuleSet) -> Result<()> {
        log::info!(
            "Replacing rule set with version {} ({} rules)",
            rules.version(),
            rules.len()
        );
        *self.rules.write()? = Arc::new(rules);
        Ok(())
    }

    /// Active facts within `relevance_hops` of the seeds.
    pub fn working_memory(&self, store: &KnowledgeStore, seeds: &[Term]) -> Result<WorkingMemory> {
        let facts = if seeds.is_empty() {
            store.find(FactPattern::any().with_limit(self.config.max_working_facts))?
        } else {
            store.neighborhood(seeds, self.config.relevance_hops, self.config.max_working_facts)?
        };
        Ok(WorkingMemory::from_facts(&facts))
    }

    pub async fn reason(&self, store: &KnowledgeStore, query: &ReasoningQuery) -> Result<ReasoningOutcome> {
        let memory = self.working_memory(store, &query.seeds)?;
        self.reason_over(memory, query).await
    }

    /// Run the state machine over an already assembled working memory.
    pub async fn reason_over(
        &self,
        mut memory: WorkingMemory,
        query: &ReasoningQuery,
    ) -> Result<ReasoningOutcome> {
        let rules = self.rules()?;
        let mut machine = StateMachine::new();
        let mut trace = ReasoningTrace::new();
        let mut failure: Option<ReasonCode> = None;
        let mut degraded = false;
        let working_facts = memory.len();

        machine.advance(ReasoningState::ForwardChain)?;
        let forward = forward_chain(
            &rules,
            &mut memory,
            &mut trace,
            ForwardLimits {
                max_firings: self.config.max_firings,
                min_confidence: self.config.min_confidence,
            },
        );
        if forward.exhausted {
            log::warn!(
                "Forward chaining stopped after {} firings without reaching a fixpoint",
                forward.firings
            );
            failure = Some(ReasonCode::RuleSetExhausted);
        }

        let mut answers: Vec<Answer> = Vec::new();
        if let (None, Some(goal)) = (failure, &query.goal) {
            machine.advance(ReasoningState::BackwardChain)?;
            let proved = BackwardChainer::new(&rules, &memory, self.config.max_depth).prove(goal);
            match proved {
                Ok(solutions) => {
                    for solution in solutions {
                        match solution.support {
                            Support::Fact(index) => {
                                let fact = memory.get(index);
                                if !fact.is_derived() {
                                    trace.push(TraceStep::Lookup {
                                        fact_id: fact.id.clone(),
                                        fact: fact.to_string(),
                                        confidence: fact.confidence,
                                    });
                                }
                                answers.push(Answer::from_working(fact, solution.bindings));
                            }
                            Support::Rule { rule, premises } => {
                                let fact = WorkingFact::derived(
                                    solution.subject,
                                    solution.predicate,
                                    solution.object,
                                    solution.confidence,
                                    &rule,
                                    premises.clone(),
                                );
                                trace.push(TraceStep::Fired {
                                    rule,
                                    bindings: solution.bindings.clone(),
                                    premises,
                                    fact_id: fact.id.clone(),
                                    fact: fact.to_string(),
                                    confidence: fact.confidence,
                                });
                                let (index, _) = memory.insert(fact);
                                answers.push(Answer::from_working(memory.get(index), solution.bindings));
                            }
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Backward chaining gave up: {}", e);
                    failure = Some(e.reason_code());
                }
            }
        }

        if failure.is_some() {
            if let Some(goal) = &query.goal {
                answers = direct_matches(&memory, goal);
            }
        }

        let mut rejected: HashSet<FactId> = HashSet::new();
        if failure.is_none() {
            machine.advance(ReasoningState::ConstraintCheck)?;
            let constraints: Vec<_> = rules
                .constraints()
                .iter()
                .filter(|c| memory.has_predicate(&c.predicate))
                .cloned()
                .collect();
            if !constraints.is_empty() {
                let facts = constraints
                    .iter()
                    .flat_map(|c| memory.with_predicate(&c.predicate).cloned())
                    .collect();
                let names = constraints
                    .iter()
                    .map(|c| c.id.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                let problem = ConstraintProblem { constraints, facts };
                let timeout = self.config.solver_timeout();
                match tokio::time::timeout(timeout, self.solver.check(&problem)).await {
                    Ok(Ok(result)) => {
                        for constraint in &problem.constraints {
                            let violations: Vec<_> = result
                                .violations
                                .iter()
                                .filter(|v| v.constraint == constraint.id)
                                .collect();
                            let (verdict, detail) = if violations.is_empty() {
                                (SolverVerdict::Satisfied, String::new())
                            } else {
                                let messages: Vec<&str> =
                                    violations.iter().map(|v| v.message.as_str()).collect();
                                (SolverVerdict::Violated, messages.join("; "))
                            };
                            trace.push(TraceStep::Solver {
                                constraint: constraint.id.clone(),
                                verdict,
                                detail,
                            });
                        }
                        for violation in &result.violations {
                            for id in &violation.facts {
                                let derived = memory
                                    .iter()
                                    .any(|f| &f.id == id && f.is_derived());
                                if derived {
                                    rejected.insert(id.clone());
                                }
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        log::warn!("Constraint solver {} failed: {}", self.solver.name(), e);
                        degraded = true;
                        trace.push(TraceStep::Solver {
                            constraint: names,
                            verdict: SolverVerdict::Unavailable,
                            detail: e.to_string(),
                        });
                    }
                    Err(_) => {
                        log::warn!(
                            "Constraint solver {} timed out after {}ms",
                            self.solver.name(),
                            timeout.as_millis()
                        );
                        trace.push(TraceStep::Solver {
                            constraint: names,
                            verdict: SolverVerdict::TimedOut,
                            detail: format!("after {}ms", timeout.as_millis()),
                        });
                        failure = Some(ReasonCode::SolverTimeout);
                    }
                }
            }
        }

        answers.retain(|a| !rejected.contains(&a.fact_id));
        let derived: Vec<Answer> = memory
            .derived()
            .filter(|f| !rejected.contains(&f.id))
            .map(|f| Answer::from_working(f, Bindings::new()))
            .collect();
        if query.goal.is_none() {
            answers = derived.clone();
        }

        if failure.is_none() {
            machine.advance(ReasoningState::Explain)?;
        }
        let explanation = trace.explain();
        match failure {
            None => machine.advance(ReasoningState::Done)?,
            Some(_) => {
                degraded = true;
                machine.advance(ReasoningState::Failed)?;
            }
        }

        let best = answers.iter().map(|a| a.confidence).fold(0.0_f32, f32::max);
        let confidence = if degraded {
            best * self.config.timeout_penalty
        } else {
            best
        };

        Ok(ReasoningOutcome {
            state: machine.current(),
            states: machine.history,
            failure,
            answers,
            derived,
            trace,
            explanation,
            confidence,
            degraded,
            firings: forward.firings,
            working_facts,
            rules_version: rules.version().to_string(),
        })
    }
}

/// Goal answers straight from working memory, used when proof search gave up.
fn direct_matches(memory: &WorkingMemory, goal: &TriplePattern) -> Vec<Answer> {
    memory
        .candidates(goal, &Bindings::new())
        .into_iter()
        .filter_map(|index| {
            let fact = memory.get(index);
            match_triple(goal, &fact.subject, &fact.predicate, &fact.object, &Bindings::new())
                .map(|b| Answer::from_working(fact, b))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::reasoning::solver::SolverResult;
    use crate::types::NewFact;
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlowSolver;

    #[async_trait]
    impl ConstraintSolver for SlowSolver {
        async fn check(&self, _problem: &ConstraintProblem) -> Result<SolverResult> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(NoemaError::provider("slow", "unreachable"))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn store_with(triples: &[(&str, &str, &str)]) -> KnowledgeStore {
        let store = KnowledgeStore::open(&EngineConfig::in_memory().store).unwrap();
        for (s, p, o) in triples {
            store.ensure_entity(s, "concept").unwrap();
            store.ensure_entity(o, "concept").unwrap();
            store.put(NewFact::between(s, p, o)).unwrap();
        }
        store
    }

    fn engine() -> ReasoningEngine {
        ReasoningEngine::from_config(&ReasoningConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_goal_query_walks_every_state() {
        let store = store_with(&[("dog", "is-a", "mammal"), ("mammal", "is-a", "animal")]);
        let query = ReasoningQuery::new().with_goal(TriplePattern::parse("dog is-a ?what").unwrap());
        let outcome = engine().reason(&store, &query).await.unwrap();

        assert_eq!(outcome.state, ReasoningState::Done);
        assert_eq!(
            outcome.states,
            vec![
                ReasoningState::Init,
                ReasoningState::ForwardChain,
                ReasoningState::BackwardChain,
                ReasoningState::ConstraintCheck,
                ReasoningState::Explain,
                ReasoningState::Done
            ]
        );
        let objects: Vec<&str> = outcome.answers.iter().map(|a| a.object.value()).collect();
        assert_eq!(objects, vec!["mammal", "animal"]);
        assert_eq!(outcome.trace.len(), 2);
        assert_eq!(outcome.explanation.len(), 2);
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn test_solver_timeout_degrades() {
        let store = store_with(&[("paris", "capital-of", "france")]);
        let config = ReasoningConfig::default().with_solver_timeout_ms(30);
        let slow = ReasoningEngine::from_config(&config)
            .unwrap()
            .with_solver(Arc::new(SlowSolver));
        let query = ReasoningQuery::new().with_seeds(vec![Term::entity("paris")]);

        let started = std::time::Instant::now();
        let degraded = slow.reason(&store, &query).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(degraded.state, ReasoningState::Failed);
        assert_eq!(degraded.failure, Some(ReasonCode::SolverTimeout));

        let normal = engine().reason(&store, &query).await.unwrap();
        assert!(normal.succeeded());
        assert!(degraded.confidence < normal.confidence);
    }

    #[tokio::test]
    async fn test_constraint_violation_rejects_derived_fact() {
        let store = store_with(&[
            ("paris", "capital-of", "france"),
            ("lyon", "capital-of", "france"),
        ]);
        let query = ReasoningQuery::new();
        let outcome = engine().reason(&store, &query).await.unwrap();
        assert!(outcome.succeeded());
        assert!(outcome
            .derived
            .iter()
            .all(|a| a.predicate != "has-capital"));
        assert!(outcome.trace.steps().iter().any(|s| matches!(
            s,
            TraceStep::Solver {
                verdict: SolverVerdict::Violated,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_exhaustion_fails_with_partial_answers() {
        let triples: Vec<(String, String)> =
            (0..12).map(|i| (format!("n{}", i), format!("n{}", i + 1))).collect();
        let refs: Vec<(&str, &str, &str)> =
            triples.iter().map(|(a, b)| (a.as_str(), "is-a", b.as_str())).collect();
        let store = store_with(&refs);
        let config = ReasoningConfig::default().with_max_firings(3);
        let engine = ReasoningEngine::from_config(&config).unwrap();
        let query = ReasoningQuery::new().with_goal(TriplePattern::parse("n0 is-a ?x").unwrap());
        let memory = engine.working_memory(&store, &[]).unwrap();
        assert_eq!(memory.len(), 12);
        let outcome = engine.reason_over(memory, &query).await.unwrap();
        assert_eq!(outcome.failure, Some(ReasonCode::RuleSetExhausted));
        assert!(outcome.degraded);
        assert!(!outcome.answers.is_empty());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut machine = StateMachine::new();
        assert!(machine.advance(ReasoningState::Explain).is_err());
        machine.advance(ReasoningState::ForwardChain).unwrap();
        machine.advance(ReasoningState::Failed).unwrap();
        assert!(machine.advance(ReasoningState::Done).is_err());
    }

    #[test]
    fn test_replace_rules() {
        let engine = engine();
        let before = engine.rules().unwrap().fingerprint().to_string();
        engine.replace_rules(RuleSet::empty()).unwrap();
        assert_ne!(engine.rules().unwrap().fingerprint(), before);
        assert!(engine.rules().unwrap().is_empty());
    }
}
