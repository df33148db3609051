use noema_core::reasoning::forward::{forward_chain, ForwardLimits};
use noema_core::reasoning::{ReasoningTrace, TriplePattern, WorkingMemory};
use noema_core::{
    EngineConfig, FactPattern, KnowledgeStore, NewFact, NoemaError, Pipeline, PipelineConfig,
    PipelineRequest, ProcessingMode, ReasoningConfig, ReasoningEngine, Rule, RuleSet,
    SemanticLayer, Term,
};
use proptest::prelude::*;
use std::sync::Arc;

fn store() -> KnowledgeStore {
    KnowledgeStore::open(&EngineConfig::in_memory().store).unwrap()
}

fn store_with(triples: &[(&str, &str, &str)]) -> KnowledgeStore {
    let store = store();
    for (s, p, o) in triples {
        store.ensure_entity(s, "concept").unwrap();
        store.ensure_entity(o, "concept").unwrap();
        store.put(NewFact::between(s, p, o)).unwrap();
    }
    store
}

#[test]
fn identical_put_commits_once() {
    let store = store_with(&[]);
    store.ensure_entity("dog", "concept").unwrap();
    store.ensure_entity("mammal", "concept").unwrap();

    let first = store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();
    let second = store.put(NewFact::between("dog", "is-a", "mammal")).unwrap();
    assert_eq!(first, second);

    let stats = store.stats().unwrap();
    assert_eq!(stats.fact_count, 1);
    assert_eq!(stats.active_facts, 1);
}

#[test]
fn contradicting_capital_is_rejected_without_change() {
    let store = store_with(&[("paris", "capital-of", "france")]);
    store.ensure_entity("germany", "concept").unwrap();
    let before = store.stats().unwrap();

    let err = store
        .put(NewFact::between("paris", "capital-of", "germany"))
        .unwrap_err();
    assert!(matches!(err, NoemaError::Consistency { .. }));

    let after = store.stats().unwrap();
    assert_eq!(before.fact_count, after.fact_count);
    assert_eq!(before.generation, after.generation);
}

#[test]
fn negated_fact_contradicts_positive() {
    let store = store_with(&[("whale", "is-a", "fish")]);
    let err = store
        .put(NewFact::between("whale", "not-is-a", "fish"))
        .unwrap_err();
    assert!(matches!(err, NoemaError::Consistency { .. }));
}

#[tokio::test]
async fn symbolic_processing_is_deterministic() {
    let triples = [
        ("dog", "is-a", "mammal"),
        ("mammal", "is-a", "animal"),
        ("animal", "is-a", "organism"),
    ];
    let mut runs = Vec::new();
    for _ in 0..3 {
        let store = store_with(&triples);
        let semantic = SemanticLayer::from_config(&EngineConfig::default().semantic).unwrap();
        let reasoning = ReasoningEngine::from_config(&ReasoningConfig::default()).unwrap();
        let pipeline =
            Pipeline::new(store, Arc::new(semantic), Arc::new(reasoning), PipelineConfig::default())
                .unwrap();
        let result = pipeline
            .process(PipelineRequest::new("(dog, is-a, ?)").with_mode(ProcessingMode::Symbolic))
            .await;
        runs.push((
            result.answer,
            result.confidence.to_bits(),
            serde_json::to_string(&result.trace).unwrap(),
        ));
    }
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[1], runs[2]);
    assert!(runs[0].0.contains("organism"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn corroboration_never_lowers_confidence(first in 0.05f32..1.0, second in 0.05f32..1.0) {
        let store = store_with(&[]);
        store.ensure_entity("paris", "place").unwrap();
        store.ensure_entity("france", "place").unwrap();
        store
            .put(NewFact::between("paris", "located-in", "france").with_confidence(first))
            .unwrap();
        store
            .put(NewFact::between("paris", "located-in", "france").with_confidence(second))
            .unwrap();

        let active = store
            .active_fact(&Term::entity("paris"), "located-in", &Term::entity("france"))
            .unwrap()
            .unwrap();
        prop_assert!(active.confidence >= first - 1e-6);
        prop_assert!(active.confidence >= second - 1e-6);
        prop_assert!(active.confidence <= 1.0);
        let visible = store.find(FactPattern::any().predicate("located-in")).unwrap();
        prop_assert_eq!(visible.len(), 1);
    }
}

const PREDICATES: [&str; 4] = ["p0", "p1", "p2", "p3"];
const NODES: usize = 4;

fn rule_strategy() -> impl Strategy<Value = (usize, usize, Option<usize>)> {
    (0..PREDICATES.len(), 0..PREDICATES.len(), proptest::option::of(0..PREDICATES.len()))
}

fn build_rules(specs: &[(usize, usize, Option<usize>)]) -> RuleSet {
    let rules = specs
        .iter()
        .enumerate()
        .map(|(i, (head, first, second))| {
            let mut when = vec![TriplePattern::parse(&format!("?a {} ?b", PREDICATES[*first])).unwrap()];
            let then = match second {
                Some(p) => {
                    when.push(TriplePattern::parse(&format!("?b {} ?c", PREDICATES[*p])).unwrap());
                    format!("?a {} ?c", PREDICATES[*head])
                }
                None => format!("?b {} ?a", PREDICATES[*head]),
            };
            Rule::new(format!("r{}", i), when, TriplePattern::parse(&then).unwrap())
        })
        .collect();
    RuleSet::new("prop", rules, Vec::new()).unwrap()
}

fn build_memory(edges: &[(usize, usize, usize)]) -> WorkingMemory {
    let store = store();
    for n in 0..NODES {
        store.ensure_entity(&format!("n{}", n), "concept").unwrap();
    }
    for (s, p, o) in edges {
        // Duplicate edges fold into one fact; cycles are allowed for p0..p3.
        store
            .put(NewFact::between(&format!("n{}", s), PREDICATES[*p], &format!("n{}", o)))
            .unwrap();
    }
    WorkingMemory::from_facts(&store.find(FactPattern::any()).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn forward_chaining_terminates(
        specs in proptest::collection::vec(rule_strategy(), 1..500),
        edges in proptest::collection::vec((0..NODES, 0..PREDICATES.len(), 0..NODES), 1..12),
    ) {
        let rules = build_rules(&specs);
        let mut memory = build_memory(&edges);
        let limits = ForwardLimits { max_firings: 1_000_000, min_confidence: 0.0 };

        let mut trace = ReasoningTrace::new();
        let outcome = forward_chain(&rules, &mut memory, &mut trace, limits);
        prop_assert!(!outcome.exhausted);
        prop_assert!(memory.len() <= NODES * NODES * PREDICATES.len());

        // A second run over the closed memory adds nothing.
        let size = memory.len();
        let mut again = ReasoningTrace::new();
        let rerun = forward_chain(&rules, &mut memory, &mut again, limits);
        prop_assert!(rerun.derived.is_empty());
        prop_assert_eq!(memory.len(), size);
    }
}
