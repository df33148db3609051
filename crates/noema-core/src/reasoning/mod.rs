//! Symbolic reasoning over the knowledge store.
//!
//! An invocation loads the facts around the request's entities into working
//! memory, saturates it with forward chaining, answers the goal by backward
//! chaining, then hands constrained predicates to a [`ConstraintSolver`].
//! Every step is recorded in a [`ReasoningTrace`].

pub mod backward;
pub mod engine;
pub mod forward;
pub mod memory;
pub mod rule;
pub mod ruleset;
pub mod solver;
pub mod trace;
pub mod unify;

pub use engine::{Answer, ReasoningEngine, ReasoningOutcome, ReasoningQuery, ReasoningState};
pub use memory::{Origin, WorkingFact, WorkingMemory};
pub use rule::{CompareOp, Condition, PredicateTerm, Rule, RuleTerm, TriplePattern};
pub use ruleset::{Constraint, ConstraintKind, RuleSet};
pub use solver::{
    BoundsSolver, ConstraintProblem, ConstraintSolver, ConstraintViolation, SolverResult, Verdict,
};
pub use trace::{ReasoningTrace, SolverVerdict, TraceStep};
pub use unify::Bindings;
