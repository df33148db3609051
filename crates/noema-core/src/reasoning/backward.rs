//! Goal-directed proof search.
//!
//! A goal is answered by matching facts in working memory, then by every rule
//! whose consequent could produce it. A goal that is a variant of one already
//! on the proof stack is cut, which keeps left-recursive rules such as
//! transitivity from looping. Anything deeper than `max_depth` fails closed.

use super::memory::WorkingMemory;
use super::rule::{PredicateTerm, RuleTerm, TriplePattern};
use super::ruleset::RuleSet;
use super::unify::{instantiate, match_triple, substitute, variant_key, Bindings};
use crate::error::{NoemaError, Result};
use crate::types::{FactId, Term};

/// How a solution was established.
#[derive(Debug, Clone, PartialEq)]
pub enum Support {
    /// Working memory index of a matching fact.
    Fact(usize),
    Rule {
        rule: String,
        premises: Vec<FactId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub bindings: Bindings,
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
    pub fact_id: FactId,
    pub confidence: f32,
    pub support: Support,
}

pub struct BackwardChainer<'a> {
    rules: &'a RuleSet,
    memory: &'a WorkingMemory,
    max_depth: usize,
    stack: Vec<String>,
    renames: usize,
    /// Deepest level reached by the last proof.
    pub deepest: usize,
}

impl<'a> BackwardChainer<'a> {
    pub fn new(rules: &'a RuleSet, memory: &'a WorkingMemory, max_depth: usize) -> Self {
        Self {
            rules,
            memory,
            max_depth,
            stack: Vec::new(),
            renames: 0,
            deepest: 0,
        }
    }

    /// All distinct ground answers to `goal`, fact-backed ones first.
    pub fn prove(&mut self, goal: &TriplePattern) -> Result<Vec<Solution>> {
        self.stack.clear();
        self.deepest = 0;
        let mut solutions = self.solve(goal, &Bindings::new(), 0)?;
        let mut seen = std::collections::HashSet::new();
        solutions.retain(|s| seen.insert(s.fact_id.clone()));
        Ok(solutions)
    }

    fn solve(&mut self, goal: &TriplePattern, bindings: &Bindings, depth: usize) -> Result<Vec<Solution>> {
        if depth > self.max_depth {
            return Err(NoemaError::DepthExceeded {
                depth: self.max_depth,
            });
        }
        self.deepest = self.deepest.max(depth);

        let grounded = substitute(goal, bindings);
        let key = variant_key(&grounded);
        if self.stack.contains(&key) {
            return Ok(Vec::new());
        }
        self.stack.push(key);
        let result = self.solve_uncut(goal, &grounded, bindings, depth);
        self.stack.pop();
        result
    }

    fn solve_uncut(
        &mut self,
        goal: &TriplePattern,
        grounded: &TriplePattern,
        bindings: &Bindings,
        depth: usize,
    ) -> Result<Vec<Solution>> {
        let mut out = Vec::new();

        for index in self.memory.candidates(grounded, &Bindings::new()) {
            let fact = self.memory.get(index);
            if let Some(extended) =
                match_triple(goal, &fact.subject, &fact.predicate, &fact.object, bindings)
            {
                out.push(Solution {
                    bindings: extended,
                    subject: fact.subject.clone(),
                    predicate: fact.predicate.clone(),
                    object: fact.object.clone(),
                    fact_id: fact.id.clone(),
                    confidence: fact.confidence,
                    support: Support::Fact(index),
                });
            }
        }

        let rules = self.rules;
        for rule in rules.rules() {
            self.renames += 1;
            let prefix = format!("{}#{}.", rule.id, self.renames);
            let head = rule.consequent.scoped(&prefix);
            let Some(seed) = seed_head(&head, grounded) else {
                continue;
            };

            let mut partial: Vec<(Bindings, Vec<FactId>, f32)> = vec![(seed, Vec::new(), 1.0)];
            for antecedent in &rule.antecedents {
                let antecedent = antecedent.scoped(&prefix);
                let mut next = Vec::new();
                for (b, premises, weakest) in &partial {
                    for sub in self.solve(&antecedent, b, depth + 1)? {
                        let mut used = premises.clone();
                        used.push(sub.fact_id.clone());
                        next.push((sub.bindings, used, weakest.min(sub.confidence)));
                    }
                }
                partial = next;
                if partial.is_empty() {
                    break;
                }
            }

            for (b, premises, weakest) in partial {
                if !rule.conditions_hold(&unscoped(&b, &prefix)) {
                    continue;
                }
                let Some((subject, predicate, object)) = instantiate(&head, &b) else {
                    continue;
                };
                let Some(extended) = match_triple(goal, &subject, &predicate, &object, bindings)
                else {
                    continue;
                };
                out.push(Solution {
                    bindings: extended,
                    fact_id: FactId::compute(&subject, &predicate, &object, 1),
                    subject,
                    predicate,
                    object,
                    confidence: (rule.confidence * weakest).clamp(0.0, 1.0),
                    support: Support::Rule {
                        rule: rule.id.clone(),
                        premises,
                    },
                });
            }
        }
        Ok(out)
    }
}

/// Bindings that make `head` agree with the goal's fixed positions, or
/// `None` if they can never agree.
fn seed_head(head: &TriplePattern, goal: &TriplePattern) -> Option<Bindings> {
    let mut seed = Bindings::new();
    match (&head.predicate, &goal.predicate) {
        (PredicateTerm::Const(a), PredicateTerm::Const(b)) if a != b => return None,
        (PredicateTerm::Var(v), PredicateTerm::Const(p)) => {
            seed.insert(v.clone(), Term::literal(p.as_str()));
        }
        _ => {}
    }
    for (h, g) in [(&head.subject, &goal.subject), (&head.object, &goal.object)] {
        match (h, g) {
            (RuleTerm::Const(a), RuleTerm::Const(b)) if a != b => return None,
            (RuleTerm::Var(v), RuleTerm::Const(c)) => match seed.get(v) {
                Some(existing) if existing != c => return None,
                _ => {
                    seed.insert(v.clone(), c.clone());
                }
            },
            _ => {}
        }
    }
    Some(seed)
}

fn unscoped(bindings: &Bindings, prefix: &str) -> Bindings {
    bindings
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(prefix).map(|name| (name.to_string(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::memory::WorkingFact;
    use crate::reasoning::rule::Rule;

    fn memory(triples: &[(&str, &str, &str)]) -> WorkingMemory {
        let mut m = WorkingMemory::new();
        for (s, p, o) in triples {
            m.insert(WorkingFact {
                id: FactId::compute(&Term::entity(s), p, &Term::entity(o), 1),
                subject: Term::entity(s),
                predicate: p.to_string(),
                object: Term::entity(o),
                confidence: 1.0,
                origin: crate::reasoning::memory::Origin::Stored,
            });
        }
        m
    }

    #[test]
    fn test_direct_and_rule_answers() {
        let rules = RuleSet::builtin().unwrap();
        let m = memory(&[("paris", "capital-of", "france")]);
        let mut chainer = BackwardChainer::new(&rules, &m, 10);
        let goal = TriplePattern::parse("france has-capital ?c").unwrap();
        let solutions = chainer.prove(&goal).unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].bindings.get("c"), Some(&Term::entity("paris")));
        assert!(matches!(solutions[0].support, Support::Rule { ref rule, .. } if rule == "capital-inverse"));
    }

    #[test]
    fn test_left_recursion_is_cut() {
        let rules = RuleSet::builtin().unwrap();
        let m = memory(&[("dog", "is-a", "mammal"), ("mammal", "is-a", "animal")]);
        let mut chainer = BackwardChainer::new(&rules, &m, 10);
        let goal = TriplePattern::parse("dog is-a animal").unwrap();
        let solutions = chainer.prove(&goal).unwrap();
        assert_eq!(solutions.len(), 1);
        assert!((solutions[0].confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_depth_limit_fails_closed() {
        let chain = Rule::parse(
            "chain",
            &["?x next ?y".to_string(), "?y reach ?z".to_string()],
            "?x reach ?z",
        )
        .unwrap();
        let base = Rule::parse("base", &["?x next ?y".to_string()], "?x reach ?y").unwrap();
        let rules = RuleSet::new("t", vec![chain, base], vec![]).unwrap();
        let triples: Vec<(String, String)> =
            (0..8).map(|i| (format!("n{}", i), format!("n{}", i + 1))).collect();
        let refs: Vec<(&str, &str, &str)> =
            triples.iter().map(|(a, b)| (a.as_str(), "next", b.as_str())).collect();
        let m = memory(&refs);

        let goal = TriplePattern::parse("n0 reach n8").unwrap();
        let mut shallow = BackwardChainer::new(&rules, &m, 3);
        assert!(matches!(shallow.prove(&goal), Err(NoemaError::DepthExceeded { depth: 3 })));

        let mut deep = BackwardChainer::new(&rules, &m, 20);
        assert_eq!(deep.prove(&goal).unwrap().len(), 1);
    }
}
