//! Rules as data: triple templates with variables, plus activation
//! conditions. Nothing here is constructed by inference itself.

use super::unify::Bindings;
use crate::error::{NoemaError, Result};
use crate::types::{normalize_label, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One position of a rule pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleTerm {
    /// `?name`. Scoped to the rule it appears in.
    Var(String),
    Const(Term),
}

impl RuleTerm {
    /// `?x` is a variable, `"text"` or a number is a literal, anything else
    /// names an entity.
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        if let Some(name) = token.strip_prefix('?') {
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(NoemaError::Config(format!("Bad variable name '{}'", token)));
            }
            return Ok(RuleTerm::Var(name.to_string()));
        }
        if let Some(inner) = token.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            return Ok(RuleTerm::Const(Term::literal(inner)));
        }
        if token.parse::<f64>().is_ok() {
            return Ok(RuleTerm::Const(Term::literal(token)));
        }
        if token.is_empty() {
            return Err(NoemaError::Config("Empty rule term".to_string()));
        }
        Ok(RuleTerm::Const(Term::entity(token)))
    }

    pub fn var(&self) -> Option<&str> {
        match self {
            RuleTerm::Var(name) => Some(name),
            RuleTerm::Const(_) => None,
        }
    }
}

impl fmt::Display for RuleTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleTerm::Var(name) => write!(f, "?{}", name),
            RuleTerm::Const(term) => write!(f, "{}", term),
        }
    }
}

/// Predicate position: a fixed predicate or a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredicateTerm {
    Var(String),
    Const(String),
}

impl fmt::Display for PredicateTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateTerm::Var(name) => write!(f, "?{}", name),
            PredicateTerm::Const(p) => f.write_str(p),
        }
    }
}

/// A triple template such as `?x is-a ?y`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: RuleTerm,
    pub predicate: PredicateTerm,
    pub object: RuleTerm,
}

impl TriplePattern {
    pub fn new(subject: RuleTerm, predicate: PredicateTerm, object: RuleTerm) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// Parse `?x is-a ?y` or `(?x is-a ?y)`; commas between terms are allowed.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .unwrap_or(trimmed);
        let parts: Vec<&str> = inner
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() != 3 {
            return Err(NoemaError::Config(format!(
                "Triple pattern must have exactly 3 terms, got {}: '{}'",
                parts.len(),
                text
            )));
        }
        let predicate = match parts[1].strip_prefix('?') {
            Some(name) if !name.is_empty() => PredicateTerm::Var(name.to_string()),
            _ => PredicateTerm::Const(normalize_label(parts[1])),
        };
        Ok(Self {
            subject: RuleTerm::parse(parts[0])?,
            predicate,
            object: RuleTerm::parse(parts[2])?,
        })
    }

    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        if let Some(v) = self.subject.var() {
            vars.insert(v.to_string());
        }
        if let PredicateTerm::Var(v) = &self.predicate {
            vars.insert(v.clone());
        }
        if let Some(v) = self.object.var() {
            vars.insert(v.to_string());
        }
        vars
    }

    pub fn fixed_predicate(&self) -> Option<&str> {
        match &self.predicate {
            PredicateTerm::Const(p) => Some(p),
            PredicateTerm::Var(_) => None,
        }
    }

    /// Rename every variable with `prefix`, so patterns from different rule
    /// applications never share bindings.
    pub fn scoped(&self, prefix: &str) -> Self {
        let term = |t: &RuleTerm| match t {
            RuleTerm::Var(v) => RuleTerm::Var(format!("{}{}", prefix, v)),
            other => other.clone(),
        };
        let predicate = match &self.predicate {
            PredicateTerm::Var(v) => PredicateTerm::Var(format!("{}{}", prefix, v)),
            other => other.clone(),
        };
        Self::new(term(&self.subject), predicate, term(&self.object))
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.subject, self.predicate, self.object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Le,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Ge,
            "==" | "=" => CompareOp::Eq,
            "!=" => CompareOp::Ne,
            _ => return None,
        })
    }

    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => (left - right).abs() < f64::EPSILON,
            CompareOp::Ne => (left - right).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// Extra test a binding must pass before a rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// The two variables must be bound to different terms.
    Distinct(String, String),
    /// Numeric comparison; operands are variables or numbers.
    Compare {
        left: RuleTerm,
        op: CompareOp,
        right: RuleTerm,
    },
}

impl Condition {
    /// Parse `?a > 18` or `?a <= ?b`.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let (left, op, right) = match parts.as_slice() {
            [l, op, r] => (*l, *op, *r),
            _ => {
                return Err(NoemaError::Config(format!(
                    "Condition must look like '?x > 3', got '{}'",
                    text
                )))
            }
        };
        let op = CompareOp::parse(op)
            .ok_or_else(|| NoemaError::Config(format!("Unknown comparison '{}'", op)))?;
        Ok(Condition::Compare {
            left: RuleTerm::parse(left)?,
            op,
            right: RuleTerm::parse(right)?,
        })
    }

    pub fn variables(&self) -> Vec<&str> {
        match self {
            Condition::Distinct(a, b) => vec![a.as_str(), b.as_str()],
            Condition::Compare { left, right, .. } => {
                left.var().into_iter().chain(right.var()).collect()
            }
        }
    }

    pub fn holds(&self, bindings: &Bindings) -> bool {
        match self {
            Condition::Distinct(a, b) => match (bindings.get(a), bindings.get(b)) {
                (Some(x), Some(y)) => x != y,
                _ => false,
            },
            Condition::Compare { left, op, right } => {
                let number = |t: &RuleTerm| match t {
                    RuleTerm::Var(v) => bindings.get(v).and_then(|term| term.as_number()),
                    RuleTerm::Const(term) => term.as_number(),
                };
                match (number(left), number(right)) {
                    (Some(l), Some(r)) => op.apply(l, r),
                    _ => false,
                }
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Distinct(a, b) => write!(f, "?{} != ?{}", a, b),
            Condition::Compare { left, op, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
        }
    }
}

/// An inference rule: when every antecedent matches, the consequent holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    /// Higher fires first.
    pub priority: i32,
    pub antecedents: Vec<TriplePattern>,
    pub consequent: TriplePattern,
    /// Multiplied into the weakest premise's confidence.
    pub confidence: f32,
    pub conditions: Vec<Condition>,
}

impl Rule {
    pub fn new(id: impl Into<String>, antecedents: Vec<TriplePattern>, consequent: TriplePattern) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            antecedents,
            consequent,
            confidence: 1.0,
            conditions: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Parse from the textual form used in rule files.
    pub fn parse(id: &str, when: &[String], then: &str) -> Result<Self> {
        let antecedents = when
            .iter()
            .map(|w| TriplePattern::parse(w))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| NoemaError::Config(format!("Rule '{}': {}", id, e)))?;
        let consequent = TriplePattern::parse(then)
            .map_err(|e| NoemaError::Config(format!("Rule '{}': {}", id, e)))?;
        Ok(Self::new(id, antecedents, consequent))
    }

    pub fn antecedent_variables(&self) -> BTreeSet<String> {
        self.antecedents.iter().flat_map(|a| a.variables()).collect()
    }

    /// A rule is usable only if it cannot invent unbound terms.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(NoemaError::Config(format!("Rule '{}': {}", self.id, msg)));
        if self.id.trim().is_empty() {
            return Err(NoemaError::Config("Rule id must not be empty".to_string()));
        }
        if self.antecedents.is_empty() {
            return fail("needs at least one antecedent".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return fail(format!("confidence {} outside [0, 1]", self.confidence));
        }
        let bound = self.antecedent_variables();
        for var in self.consequent.variables() {
            if !bound.contains(&var) {
                return fail(format!("consequent variable ?{} is not bound by any antecedent", var));
            }
        }
        for condition in &self.conditions {
            for var in condition.variables() {
                if !bound.contains(var) {
                    return fail(format!("condition variable ?{} is not bound", var));
                }
            }
        }
        Ok(())
    }

    pub fn conditions_hold(&self, bindings: &Bindings) -> bool {
        self.conditions.iter().all(|c| c.holds(bindings))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when: Vec<String> = self.antecedents.iter().map(|a| a.to_string()).collect();
        write!(f, "{}: {} => {}", self.id, when.join(" & "), self.consequent)
    }
}
