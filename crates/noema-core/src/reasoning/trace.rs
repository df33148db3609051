use super::unify::Bindings;
use crate::types::FactId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverVerdict {
    Satisfied,
    Violated,
    TimedOut,
    Unavailable,
}

impl SolverVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverVerdict::Satisfied => "satisfied",
            SolverVerdict::Violated => "violated",
            SolverVerdict::TimedOut => "timed out",
            SolverVerdict::Unavailable => "unavailable",
        }
    }
}

/// One inference step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TraceStep {
    /// A rule produced a new fact.
    Fired {
        rule: String,
        bindings: Bindings,
        premises: Vec<FactId>,
        fact_id: FactId,
        fact: String,
        confidence: f32,
    },
    /// A goal was answered directly by a stored fact.
    Lookup {
        fact_id: FactId,
        fact: String,
        confidence: f32,
    },
    /// A constraint was handed to the solver.
    Solver {
        constraint: String,
        verdict: SolverVerdict,
        detail: String,
    },
}

/// Ordered steps of one reasoning invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    steps: Vec<TraceStep>,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn fired_rules(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                TraceStep::Fired { rule, .. } => Some(rule.as_str()),
                _ => None,
            })
            .collect()
    }

    /// One human-readable line per step.
    pub fn explain(&self) -> Vec<String> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| match step {
                TraceStep::Fired {
                    rule,
                    fact,
                    confidence,
                    ..
                } => format!(
                    "Step {}: applied {} to derive {} (confidence {:.2})",
                    i + 1,
                    rule,
                    fact,
                    confidence
                ),
                TraceStep::Lookup {
                    fact, confidence, ..
                } => format!(
                    "Step {}: found {} in the knowledge store (confidence {:.2})",
                    i + 1,
                    fact,
                    confidence
                ),
                TraceStep::Solver {
                    constraint,
                    verdict,
                    detail,
                } if detail.is_empty() => format!(
                    "Step {}: solver checked {}: {}",
                    i + 1,
                    constraint,
                    verdict.as_str()
                ),
                TraceStep::Solver {
                    constraint,
                    verdict,
                    detail,
                } => format!(
                    "Step {}: solver checked {}: {} ({})",
                    i + 1,
                    constraint,
                    verdict.as_str(),
                    detail
                ),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Term;

    #[test]
    fn test_explain_lines() {
        let mut trace = ReasoningTrace::new();
        trace.push(TraceStep::Fired {
            rule: "is-a-transitive".into(),
            bindings: Bindings::new(),
            premises: vec![],
            fact_id: FactId::compute(&Term::entity("dog"), "is-a", &Term::entity("animal"), 1),
            fact: "(dog, is-a, animal)".into(),
            confidence: 0.95,
        });
        trace.push(TraceStep::Solver {
            constraint: "age-range".into(),
            verdict: SolverVerdict::Satisfied,
            detail: String::new(),
        });
        let lines = trace.explain();
        assert_eq!(
            lines[0],
            "Step 1: applied is-a-transitive to derive (dog, is-a, animal) (confidence 0.95)"
        );
        assert_eq!(lines[1], "Step 2: solver checked age-range: satisfied");
        assert_eq!(trace.fired_rules(), vec!["is-a-transitive"]);
    }
}
