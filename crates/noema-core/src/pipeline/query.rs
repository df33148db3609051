//! Turning request text into a reasoning goal.
//!
//! Accepted forms, tried in order:
//! - `(s, p, o)` with `?` or `?name` in any position
//! - `s p ?` and friends: three bare tokens, at least one a variable
//! - `what is the <relation> of <thing>?`
//! - `what is <thing>?`, asking for its classification
//! - yes/no questions whose extracted relation becomes a ground goal

use crate::error::{NoemaError, Result};
use crate::reasoning::{PredicateTerm, RuleTerm, TriplePattern};
use crate::relations::defaults as rel;
use crate::semantic::ExtractedRelation;
use crate::types::{normalize_label, Term};
use regex::Regex;

/// Variable name given to a bare `?`.
pub const ANSWER_VAR: &str = "answer";

const YES_NO_OPENERS: &[&str] = &["is", "are", "does", "do", "did", "can", "was", "were"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalSyntax {
    /// Explicit triple notation.
    Triple,
    /// A wh-question mapped onto a relation.
    Question,
    /// A yes/no question with every position fixed.
    YesNo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedGoal {
    pub pattern: TriplePattern,
    pub syntax: GoalSyntax,
}

impl ParsedGoal {
    /// Variables the caller wants values for.
    pub fn wanted(&self) -> Vec<String> {
        self.pattern.variables().into_iter().collect()
    }
}

pub struct QueryParser {
    relation_question: Regex,
    definition_question: Regex,
}

impl QueryParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| NoemaError::Config(format!("Bad query pattern: {}", e)))
        };
        Ok(Self {
            relation_question: compile(
                r"(?i)^(?:what|who|which)\s+(?:is|are|was|were)\s+the\s+(?P<rel>[a-z][a-z\s-]*?)\s+of\s+(?P<o>[^?]+?)\s*\??$",
            )?,
            definition_question: compile(
                r"(?i)^(?:what|who)\s+(?:is|are)\s+(?:a\s+|an\s+|the\s+)?(?P<s>[^?]+?)\s*\??$",
            )?,
        })
    }

    /// The goal the text asks for, if it asks for one. `relations` comes
    /// from the semantic layer and is only used for yes/no questions.
    pub fn parse(&self, text: &str, relations: &[ExtractedRelation]) -> Option<ParsedGoal> {
        let text = text.trim();
        if let Some(pattern) = parse_triple(text) {
            return Some(ParsedGoal {
                pattern,
                syntax: GoalSyntax::Triple,
            });
        }
        if let Some(caps) = self.relation_question.captures(text) {
            let relation = normalize_label(&format!("{} of", &caps["rel"]));
            let object = normalize_label(&caps["o"]);
            if !object.is_empty() {
                return Some(ParsedGoal {
                    pattern: TriplePattern::new(
                        RuleTerm::Var(ANSWER_VAR.to_string()),
                        PredicateTerm::Const(relation),
                        RuleTerm::Const(Term::entity(&object)),
                    ),
                    syntax: GoalSyntax::Question,
                });
            }
        }
        if let Some(caps) = self.definition_question.captures(text) {
            let subject = normalize_label(&caps["s"]);
            if !subject.is_empty() && subject.split('-').count() <= 4 {
                return Some(ParsedGoal {
                    pattern: TriplePattern::new(
                        RuleTerm::Const(Term::entity(&subject)),
                        PredicateTerm::Const(rel::IS_A.to_string()),
                        RuleTerm::Var(ANSWER_VAR.to_string()),
                    ),
                    syntax: GoalSyntax::Question,
                });
            }
        }
        if is_yes_no(text) {
            if let Some(relation) = relations.first() {
                return Some(ParsedGoal {
                    pattern: TriplePattern::new(
                        RuleTerm::Const(Term::entity(&relation.subject)),
                        PredicateTerm::Const(normalize_label(&relation.predicate)),
                        RuleTerm::Const(Term::entity(&relation.object)),
                    ),
                    syntax: GoalSyntax::YesNo,
                });
            }
        }
        None
    }
}

fn is_yes_no(text: &str) -> bool {
    let first = text
        .split_whitespace()
        .next()
        .map(|w| w.to_lowercase())
        .unwrap_or_default();
    text.ends_with('?') && YES_NO_OPENERS.contains(&first.as_str())
}

/// `(s, p, o)` or three bare tokens with at least one variable.
fn parse_triple(text: &str) -> Option<TriplePattern> {
    let (inner, bracketed) = match text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        Some(inner) => (inner, true),
        None => (text, false),
    };
    let mut parts: Vec<String> = if bracketed {
        inner.split(',').map(|p| p.trim().to_string()).collect()
    } else {
        inner.split_whitespace().map(str::to_string).collect()
    };
    // question mark closing a sentence, as in `dog is-a ?x?` or `?x is-a animal?`
    if let Some(last) = parts.last_mut() {
        if last.len() > 1 && last.ends_with('?') {
            last.pop();
        }
    }
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    if !bracketed && !parts.iter().any(|p| p.starts_with('?')) {
        return None;
    }

    let term = |token: &str| -> Option<RuleTerm> {
        match token.strip_prefix('?') {
            Some("") => Some(RuleTerm::Var(ANSWER_VAR.to_string())),
            Some(_) => RuleTerm::parse(token).ok(),
            None if token.starts_with('"') => RuleTerm::parse(token).ok(),
            None => Some(RuleTerm::Const(Term::entity(token))),
        }
    };
    let predicate = match parts[1].strip_prefix('?') {
        Some("") => PredicateTerm::Var("predicate".to_string()),
        Some(name) => PredicateTerm::Var(name.to_string()),
        None => PredicateTerm::Const(normalize_label(&parts[1])),
    };
    let subject = term(&parts[0])?;
    let object = term(&parts[2])?;
    // two bare `?` would collapse into one variable
    if subject == object && subject.var().is_some() {
        return Some(TriplePattern::new(
            subject,
            predicate,
            RuleTerm::Var(format!("{}_object", ANSWER_VAR)),
        ));
    }
    Some(TriplePattern::new(subject, predicate, object))
}

/// The value a caller would read as the answer to `goal` under `bindings`.
pub fn describe_binding(goal: &TriplePattern, bindings: &crate::reasoning::Bindings) -> Option<String> {
    let values: Vec<String> = goal
        .variables()
        .into_iter()
        .filter_map(|v| bindings.get(&v).map(|t| t.value().to_string()))
        .collect();
    (!values.is_empty()).then(|| values.join(" "))
}
