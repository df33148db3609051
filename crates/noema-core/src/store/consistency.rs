use crate::config::{ExclusivityRule, StoreConfig};
use crate::error::{NoemaError, Result};
use crate::storage::Storage;
use crate::types::{normalize_label, Fact, FactId, FactPattern, Term};
use std::collections::HashSet;

/// Kind of contradiction found for an incoming fact.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// The fact would close a cycle over an acyclic predicate.
    Cycle { predicate: String },
    /// A functional predicate already has a different object for the subject.
    Functional { existing: Term },
    /// The object is mutually exclusive with one the subject already holds.
    Disjoint { existing: Term },
    /// The negated (or positive) form of the fact is already asserted.
    Negation { predicate: String },
}

impl Violation {
    pub fn describe(&self) -> String {
        match self {
            Violation::Cycle { predicate } => format!("would create a cycle over '{}'", predicate),
            Violation::Functional { existing } => {
                format!("functional predicate already maps subject to {}", existing)
            }
            Violation::Disjoint { existing } => {
                format!("object is mutually exclusive with {}", existing)
            }
            Violation::Negation { predicate } => {
                format!("contradicts existing '{}' fact", predicate)
            }
        }
    }
}

/// Active facts as they will look once the batch commits: the store's active
/// rows minus versions the batch supersedes, plus facts earlier in the batch.
struct BatchView<'a> {
    storage: &'a dyn Storage,
    pending: &'a [Fact],
    superseded: &'a HashSet<FactId>,
}

impl BatchView<'_> {
    fn matching(&self, pattern: &FactPattern) -> Result<Vec<Fact>> {
        let ids = self.storage.select(pattern, usize::MAX)?;
        let mut out: Vec<Fact> = self
            .storage
            .get_facts(&ids)?
            .into_iter()
            .flatten()
            .filter(|row| row.status.is_active() && !self.superseded.contains(&row.fact.id))
            .map(|row| row.fact)
            .collect();
        out.extend(self.pending.iter().filter(|f| pattern.matches(f)).cloned());
        Ok(out)
    }
}

/// Post-batch contradiction checks: acyclic predicates, exclusivity rules and
/// negated predicates.
#[derive(Debug, Clone)]
pub struct ConsistencyChecker {
    acyclic: HashSet<String>,
    exclusivity: Vec<ExclusivityRule>,
    negation_prefix: String,
}

impl ConsistencyChecker {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            acyclic: config
                .acyclic_predicates
                .iter()
                .map(|p| normalize_label(p))
                .collect(),
            exclusivity: config.exclusivity.clone(),
            negation_prefix: config.negation_prefix.clone(),
        }
    }

    /// Check `incoming` in order against the store. The first contradiction
    /// rejects the whole batch.
    pub fn check_batch(
        &self,
        storage: &dyn Storage,
        incoming: &[Fact],
        superseded: &HashSet<FactId>,
    ) -> Result<()> {
        for (i, fact) in incoming.iter().enumerate() {
            let view = BatchView {
                storage,
                pending: &incoming[..i],
                superseded,
            };
            if let Some(violation) = self.check_fact(&view, fact)? {
                log::debug!("Rejecting {}: {}", fact, violation.describe());
                return Err(NoemaError::consistency(fact, violation.describe()));
            }
        }
        Ok(())
    }

    fn check_fact(&self, view: &BatchView<'_>, fact: &Fact) -> Result<Option<Violation>> {
        if let Some(v) = self.check_negation(view, fact)? {
            return Ok(Some(v));
        }
        if let Some(v) = self.check_exclusivity(view, fact)? {
            return Ok(Some(v));
        }
        if self.acyclic.contains(&fact.predicate) && self.closes_cycle(view, fact)? {
            return Ok(Some(Violation::Cycle {
                predicate: fact.predicate.clone(),
            }));
        }
        Ok(None)
    }

    /// `(s, not-p, o)` and `(s, p, o)` cannot both be active.
    fn check_negation(&self, view: &BatchView<'_>, fact: &Fact) -> Result<Option<Violation>> {
        let opposite = match fact.predicate.strip_prefix(&self.negation_prefix) {
            Some(positive) if !positive.is_empty() => positive.to_string(),
            _ => format!("{}{}", self.negation_prefix, fact.predicate),
        };
        let pattern = FactPattern::any()
            .subject(fact.subject.clone())
            .predicate(&opposite)
            .object(fact.object.clone());
        if view.matching(&pattern)?.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Violation::Negation { predicate: opposite }))
        }
    }

    fn check_exclusivity(&self, view: &BatchView<'_>, fact: &Fact) -> Result<Option<Violation>> {
        for rule in &self.exclusivity {
            if normalize_label(rule.predicate()) != fact.predicate {
                continue;
            }
            let pattern = FactPattern::any()
                .subject(fact.subject.clone())
                .predicate(&fact.predicate);
            let existing = view.matching(&pattern)?;

            match rule {
                ExclusivityRule::Functional { .. } => {
                    if let Some(other) = existing.iter().find(|f| f.object != fact.object) {
                        return Ok(Some(Violation::Functional {
                            existing: other.object.clone(),
                        }));
                    }
                }
                ExclusivityRule::Disjoint { objects, .. } => {
                    let set: HashSet<String> = objects.iter().map(|o| normalize_label(o)).collect();
                    if !set.contains(&normalize_label(fact.object.value())) {
                        continue;
                    }
                    if let Some(other) = existing.iter().find(|f| {
                        f.object != fact.object && set.contains(&normalize_label(f.object.value()))
                    }) {
                        return Ok(Some(Violation::Disjoint {
                            existing: other.object.clone(),
                        }));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Whether `object` already reaches `subject` over the same predicate.
    fn closes_cycle(&self, view: &BatchView<'_>, fact: &Fact) -> Result<bool> {
        if fact.subject == fact.object {
            return Ok(true);
        }
        let mut visited: HashSet<Term> = HashSet::new();
        let mut stack = vec![fact.object.clone()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.clone()) {
                continue;
            }
            let pattern = FactPattern::any().subject(node).predicate(&fact.predicate);
            for next in view.matching(&pattern)? {
                if next.object == fact.subject {
                    return Ok(true);
                }
                stack.push(next.object);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CommitBatch, RedbStorage};
    use crate::types::{Entity, NewFact, Provenance};
    use chrono::Utc;

    fn fact(s: &str, p: &str, o: &str) -> Fact {
        let draft = NewFact::between(s, p, o);
        Fact {
            id: FactId::compute(&draft.subject, &draft.predicate, &draft.object, 1),
            subject: draft.subject,
            predicate: draft.predicate,
            object: draft.object,
            confidence: 1.0,
            provenance: Provenance::asserted("test"),
            created_at: Utc::now(),
            version: 1,
            supersedes: None,
        }
    }

    fn storage_with(facts: Vec<Fact>) -> RedbStorage {
        let storage = RedbStorage::open_in_memory().unwrap();
        let mut entities = Vec::new();
        for f in &facts {
            entities.push(Entity::new(f.subject.value(), "concept"));
            entities.push(Entity::new(f.object.value(), "concept"));
        }
        storage
            .commit(&CommitBatch {
                entities,
                facts,
                ..CommitBatch::default()
            })
            .unwrap();
        storage
    }

    fn checker() -> ConsistencyChecker {
        let config = StoreConfig::default().with_exclusivity(ExclusivityRule::Disjoint {
            predicate: "status".into(),
            objects: vec!["alive".into(), "dead".into()],
        });
        ConsistencyChecker::new(&config)
    }

    #[test]
    fn test_cycle_over_acyclic_predicate() {
        let storage = storage_with(vec![fact("dog", "is-a", "mammal"), fact("mammal", "is-a", "animal")]);
        let none = HashSet::new();
        let result = checker().check_batch(&storage, &[fact("animal", "is-a", "dog")], &none);
        assert!(matches!(result, Err(NoemaError::Consistency { .. })));

        // Not a designated acyclic predicate
        assert!(checker()
            .check_batch(&storage, &[fact("animal", "likes", "dog")], &none)
            .is_ok());
    }

    #[test]
    fn test_self_loop_rejected() {
        let storage = storage_with(vec![]);
        let none = HashSet::new();
        assert!(checker()
            .check_batch(&storage, &[fact("a", "part-of", "a")], &none)
            .is_err());
    }

    #[test]
    fn test_cycle_within_batch() {
        let storage = storage_with(vec![]);
        let none = HashSet::new();
        let batch = [fact("a", "is-a", "b"), fact("b", "is-a", "a")];
        assert!(checker().check_batch(&storage, &batch, &none).is_err());
    }

    #[test]
    fn test_functional_predicate() {
        let storage = storage_with(vec![fact("paris", "capital-of", "france")]);
        let none = HashSet::new();
        assert!(checker()
            .check_batch(&storage, &[fact("paris", "capital-of", "germany")], &none)
            .is_err());
        assert!(checker()
            .check_batch(&storage, &[fact("berlin", "capital-of", "germany")], &none)
            .is_ok());
    }

    #[test]
    fn test_superseded_versions_are_ignored() {
        let existing = fact("paris", "capital-of", "france");
        let storage = storage_with(vec![existing.clone()]);
        let mut superseded = HashSet::new();
        superseded.insert(existing.id);
        assert!(checker()
            .check_batch(&storage, &[fact("paris", "capital-of", "germany")], &superseded)
            .is_ok());
    }

    #[test]
    fn test_disjoint_objects() {
        let storage = storage_with(vec![fact("cat", "status", "alive")]);
        let none = HashSet::new();
        assert!(checker()
            .check_batch(&storage, &[fact("cat", "status", "dead")], &none)
            .is_err());
        assert!(checker()
            .check_batch(&storage, &[fact("cat", "status", "hungry")], &none)
            .is_ok());
    }

    #[test]
    fn test_negation_contradiction() {
        let storage = storage_with(vec![fact("penguin", "can-fly", "yes")]);
        let none = HashSet::new();
        let result = checker().check_batch(&storage, &[fact("penguin", "not-can-fly", "yes")], &none);
        match result {
            Err(NoemaError::Consistency { reason, .. }) => assert!(reason.contains("can-fly")),
            other => panic!("expected consistency error, got {:?}", other),
        }
    }
}
