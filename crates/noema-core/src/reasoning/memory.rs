use super::rule::TriplePattern;
use super::unify::{resolve, Bindings};
use crate::types::{triple_key, Fact, FactId, Term};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Where a working fact came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Origin {
    Stored,
    Derived { rule: String, premises: Vec<FactId> },
}

/// A fact visible to one reasoning invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingFact {
    pub id: FactId,
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
    pub confidence: f32,
    pub origin: Origin,
}

impl WorkingFact {
    pub fn stored(fact: &Fact) -> Self {
        Self {
            id: fact.id.clone(),
            subject: fact.subject.clone(),
            predicate: fact.predicate.clone(),
            object: fact.object.clone(),
            confidence: fact.confidence,
            origin: Origin::Stored,
        }
    }

    /// A conclusion not yet in the store. Its id is the one the store would
    /// give the triple's first version.
    pub fn derived(
        subject: Term,
        predicate: String,
        object: Term,
        confidence: f32,
        rule: &str,
        premises: Vec<FactId>,
    ) -> Self {
        Self {
            id: FactId::compute(&subject, &predicate, &object, 1),
            subject,
            predicate,
            object,
            confidence: confidence.clamp(0.0, 1.0),
            origin: Origin::Derived {
                rule: rule.to_string(),
                premises,
            },
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.origin, Origin::Derived { .. })
    }

    pub fn rule(&self) -> Option<&str> {
        match &self.origin {
            Origin::Derived { rule, .. } => Some(rule),
            Origin::Stored => None,
        }
    }

    pub fn triple_key(&self) -> String {
        triple_key(&self.subject, &self.predicate, &self.object)
    }
}

impl fmt::Display for WorkingFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

fn subject_key(predicate: &str, subject: &Term) -> String {
    format!("{}\u{1f}{}", predicate, subject.key())
}

/// Facts for one invocation, in insertion order, indexed by triple, by
/// predicate and by predicate plus subject.
#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    facts: Vec<WorkingFact>,
    by_triple: HashMap<String, usize>,
    by_predicate: HashMap<String, Vec<usize>>,
    by_subject: HashMap<String, Vec<usize>>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_facts(facts: &[Fact]) -> Self {
        let mut memory = Self::new();
        for fact in facts {
            memory.insert(WorkingFact::stored(fact));
        }
        memory
    }

    /// Add a fact. Returns its index and whether it was new; an existing
    /// triple is left as it is.
    pub fn insert(&mut self, fact: WorkingFact) -> (usize, bool) {
        let key = fact.triple_key();
        if let Some(&index) = self.by_triple.get(&key) {
            return (index, false);
        }
        let index = self.facts.len();
        self.by_predicate
            .entry(fact.predicate.clone())
            .or_default()
            .push(index);
        self.by_subject
            .entry(subject_key(&fact.predicate, &fact.subject))
            .or_default()
            .push(index);
        self.by_triple.insert(key, index);
        self.facts.push(fact);
        (index, true)
    }

    pub fn get(&self, index: usize) -> &WorkingFact {
        &self.facts[index]
    }

    pub fn find(&self, subject: &Term, predicate: &str, object: &Term) -> Option<usize> {
        self.by_triple
            .get(&triple_key(subject, predicate, object))
            .copied()
    }

    /// Indices worth testing against `pattern` under `bindings`, ascending.
    pub fn candidates(&self, pattern: &TriplePattern, bindings: &Bindings) -> Vec<usize> {
        match pattern.fixed_predicate() {
            Some(predicate) => match resolve(&pattern.subject, bindings) {
                Some(subject) => self
                    .by_subject
                    .get(&subject_key(predicate, &subject))
                    .cloned()
                    .unwrap_or_default(),
                None => self.by_predicate.get(predicate).cloned().unwrap_or_default(),
            },
            None => (0..self.facts.len()).collect(),
        }
    }

    pub fn has_predicate(&self, predicate: &str) -> bool {
        self.by_predicate.contains_key(predicate)
    }

    pub fn with_predicate(&self, predicate: &str) -> impl Iterator<Item = &WorkingFact> {
        self.by_predicate
            .get(predicate)
            .into_iter()
            .flatten()
            .map(|i| &self.facts[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkingFact> {
        self.facts.iter()
    }

    pub fn derived(&self) -> impl Iterator<Item = &WorkingFact> {
        self.facts.iter().filter(|f| f.is_derived())
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf(s: &str, p: &str, o: &str) -> WorkingFact {
        WorkingFact::derived(Term::entity(s), p.to_string(), Term::entity(o), 0.9, "test", vec![])
    }

    #[test]
    fn test_insert_dedups_triples() {
        let mut m = WorkingMemory::new();
        assert_eq!(m.insert(wf("a", "p", "b")), (0, true));
        assert_eq!(m.insert(wf("a", "p", "b")), (0, false));
        assert_eq!(m.insert(wf("a", "q", "b")), (1, true));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_candidates_use_indices() {
        let mut m = WorkingMemory::new();
        m.insert(wf("a", "p", "b"));
        m.insert(wf("b", "p", "c"));
        m.insert(wf("a", "q", "c"));
        let pattern = TriplePattern::parse("?x p ?y").unwrap();
        assert_eq!(m.candidates(&pattern, &Bindings::new()), vec![0, 1]);
        let mut b = Bindings::new();
        b.insert("x".into(), Term::entity("b"));
        assert_eq!(m.candidates(&pattern, &b), vec![1]);
        let any = TriplePattern::parse("?x ?r ?y").unwrap();
        assert_eq!(m.candidates(&any, &Bindings::new()).len(), 3);
    }
}
