use super::memory::WorkingFact;
use super::ruleset::{Constraint, ConstraintKind};
use super::unify::Bindings;
use crate::error::Result;
use crate::types::{FactId, Term};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Constraints plus the facts they range over.
#[derive(Debug, Clone, Default)]
pub struct ConstraintProblem {
    pub constraints: Vec<Constraint>,
    pub facts: Vec<WorkingFact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Sat,
    Unsat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub constraint: String,
    pub facts: Vec<FactId>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverResult {
    pub verdict: Verdict,
    /// Values the solver established, keyed `<constraint>.<subject>`.
    pub bindings: Bindings,
    pub violations: Vec<ConstraintViolation>,
}

impl SolverResult {
    pub fn violated(&self, constraint: &str) -> bool {
        self.violations.iter().any(|v| v.constraint == constraint)
    }
}

/// External capability for checks the rule engine cannot express. Calls are
/// wrapped in a timeout by the caller.
#[async_trait]
pub trait ConstraintSolver: Send + Sync {
    async fn check(&self, problem: &ConstraintProblem) -> Result<SolverResult>;

    fn name(&self) -> &str;
}

/// Built-in solver for numeric ranges and cardinality limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundsSolver;

impl BoundsSolver {
    fn check_range(
        constraint: &Constraint,
        facts: &[&WorkingFact],
        bindings: &mut Bindings,
        violations: &mut Vec<ConstraintViolation>,
    ) {
        for fact in facts {
            let key = format!("{}.{}", constraint.id, fact.subject.value());
            let Some(value) = fact.object.as_number() else {
                violations.push(ConstraintViolation {
                    constraint: constraint.id.clone(),
                    facts: vec![fact.id.clone()],
                    message: format!("{} is not numeric in {}", fact.object, fact),
                });
                continue;
            };
            let below = constraint.min.is_some_and(|lo| value < lo);
            let above = constraint.max.is_some_and(|hi| value > hi);
            if below || above {
                violations.push(ConstraintViolation {
                    constraint: constraint.id.clone(),
                    facts: vec![fact.id.clone()],
                    message: format!(
                        "{} outside [{}, {}] in {}",
                        value,
                        constraint.min.map_or("-inf".to_string(), |v| v.to_string()),
                        constraint.max.map_or("inf".to_string(), |v| v.to_string()),
                        fact
                    ),
                });
            } else {
                bindings.insert(key, fact.object.clone());
            }
        }
    }

    fn check_cardinality(
        constraint: &Constraint,
        facts: &[&WorkingFact],
        bindings: &mut Bindings,
        violations: &mut Vec<ConstraintViolation>,
    ) {
        let limit = constraint.max.unwrap_or(1.0) as usize;
        let mut by_subject: BTreeMap<String, Vec<&WorkingFact>> = BTreeMap::new();
        for fact in facts {
            by_subject.entry(fact.subject.key()).or_default().push(*fact);
        }
        for group in by_subject.values() {
            let subject = &group[0].subject;
            let key = format!("{}.{}", constraint.id, subject.value());
            if group.len() > limit {
                violations.push(ConstraintViolation {
                    constraint: constraint.id.clone(),
                    facts: group.iter().map(|f| f.id.clone()).collect(),
                    message: format!(
                        "{} has {} values for {}, at most {} allowed",
                        subject,
                        group.len(),
                        constraint.predicate,
                        limit
                    ),
                });
            } else {
                bindings.insert(key, Term::literal(group.len().to_string()));
            }
        }
    }
}

#[async_trait]
impl ConstraintSolver for BoundsSolver {
    async fn check(&self, problem: &ConstraintProblem) -> Result<SolverResult> {
        let mut bindings = Bindings::new();
        let mut violations = Vec::new();
        for constraint in &problem.constraints {
            let facts: Vec<&WorkingFact> = problem
                .facts
                .iter()
                .filter(|f| f.predicate == constraint.predicate)
                .collect();
            match constraint.kind {
                ConstraintKind::Range => {
                    Self::check_range(constraint, &facts, &mut bindings, &mut violations)
                }
                ConstraintKind::Cardinality => {
                    Self::check_cardinality(constraint, &facts, &mut bindings, &mut violations)
                }
            }
        }
        Ok(SolverResult {
            verdict: if violations.is_empty() {
                Verdict::Sat
            } else {
                Verdict::Unsat
            },
            bindings,
            violations,
        })
    }

    fn name(&self) -> &str {
        "bounds"
    }
}
