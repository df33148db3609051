//! Forward chaining to a fixpoint.
//!
//! Each pass walks the rules in firing order and matches every antecedent
//! conjunction against working memory. A (rule, bindings) pair fires at most
//! once per invocation, so the number of firings is bounded by the distinct
//! bindings and the loop always ends.

use super::memory::{WorkingFact, WorkingMemory};
use super::rule::Rule;
use super::ruleset::RuleSet;
use super::trace::{ReasoningTrace, TraceStep};
use super::unify::{binding_key, instantiate, match_triple, Bindings};
use crate::types::FactId;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
pub struct ForwardLimits {
    pub max_firings: usize,
    pub min_confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardOutcome {
    /// Working memory indices of new facts, in derivation order.
    pub derived: Vec<usize>,
    /// Rule applications, including ones that only re-derived a known fact.
    pub firings: usize,
    pub passes: usize,
    /// The firing budget ran out before a fixpoint was reached.
    pub exhausted: bool,
}

/// Every way the rule's antecedents match, with the premise indices used.
pub(super) fn match_rule(rule: &Rule, memory: &WorkingMemory) -> Vec<(Bindings, Vec<usize>)> {
    let mut partial: Vec<(Bindings, Vec<usize>)> = vec![(Bindings::new(), Vec::new())];
    for antecedent in &rule.antecedents {
        let mut next = Vec::new();
        for (bindings, premises) in &partial {
            for index in memory.candidates(antecedent, bindings) {
                let fact = memory.get(index);
                if let Some(extended) =
                    match_triple(antecedent, &fact.subject, &fact.predicate, &fact.object, bindings)
                {
                    let mut used = premises.clone();
                    used.push(index);
                    next.push((extended, used));
                }
            }
        }
        partial = next;
        if partial.is_empty() {
            break;
        }
    }
    partial
}

pub fn forward_chain(
    rules: &RuleSet,
    memory: &mut WorkingMemory,
    trace: &mut ReasoningTrace,
    limits: ForwardLimits,
) -> ForwardOutcome {
    let mut outcome = ForwardOutcome::default();
    let mut visited: HashSet<(String, String)> = HashSet::new();

    loop {
        outcome.passes += 1;
        let mut progressed = false;

        for rule in rules.rules() {
            for (bindings, premises) in match_rule(rule, memory) {
                if !visited.insert((rule.id.clone(), binding_key(&bindings))) {
                    continue;
                }
                if !rule.conditions_hold(&bindings) {
                    continue;
                }
                let Some((subject, predicate, object)) = instantiate(&rule.consequent, &bindings)
                else {
                    continue;
                };
                if outcome.firings >= limits.max_firings {
                    outcome.exhausted = true;
                    return outcome;
                }
                outcome.firings += 1;

                let weakest = premises
                    .iter()
                    .map(|i| memory.get(*i).confidence)
                    .fold(1.0_f32, f32::min);
                let confidence = (rule.confidence * weakest).clamp(0.0, 1.0);
                if confidence < limits.min_confidence {
                    continue;
                }
                if memory.find(&subject, &predicate, &object).is_some() {
                    continue;
                }

                let premise_ids: Vec<FactId> =
                    premises.iter().map(|i| memory.get(*i).id.clone()).collect();
                let fact = WorkingFact::derived(
                    subject,
                    predicate,
                    object,
                    confidence,
                    &rule.id,
                    premise_ids.clone(),
                );
                trace.push(TraceStep::Fired {
                    rule: rule.id.clone(),
                    bindings,
                    premises: premise_ids,
                    fact_id: fact.id.clone(),
                    fact: fact.to_string(),
                    confidence: fact.confidence,
                });
                let (index, _) = memory.insert(fact);
                outcome.derived.push(index);
                progressed = true;
            }
        }

        if !progressed {
            return outcome;
        }
    }
}
