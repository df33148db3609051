use super::rule::{Condition, Rule};
use crate::error::{NoemaError, Result};
use crate::types::{content_hash, normalize_label};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

const BUILTIN_RULES: &str = include_str!("../../rules/default.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintKind {
    /// Numeric objects of `predicate` must lie within `[min, max]`.
    Range,
    /// A subject may have at most `max` distinct objects for `predicate`.
    Cardinality,
}

/// A check handed to the constraint solver rather than the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    pub predicate: String,
    pub kind: ConstraintKind,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Constraint {
    pub fn range(id: &str, predicate: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            id: id.to_string(),
            predicate: normalize_label(predicate),
            kind: ConstraintKind::Range,
            min,
            max,
        }
    }

    pub fn cardinality(id: &str, predicate: &str, max: usize) -> Self {
        Self {
            id: id.to_string(),
            predicate: normalize_label(predicate),
            kind: ConstraintKind::Cardinality,
            min: None,
            max: Some(max as f64),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| {
            Err(NoemaError::Config(format!("Constraint '{}': {}", self.id, msg)))
        };
        if self.id.trim().is_empty() {
            return Err(NoemaError::Config("Constraint id must not be empty".to_string()));
        }
        if self.predicate.trim().is_empty() {
            return fail("predicate must not be empty");
        }
        match self.kind {
            ConstraintKind::Range => {
                if self.min.is_none() && self.max.is_none() {
                    return fail("range needs min or max");
                }
                if let (Some(lo), Some(hi)) = (self.min, self.max) {
                    if lo > hi {
                        return fail("min exceeds max");
                    }
                }
            }
            ConstraintKind::Cardinality => match self.max {
                Some(m) if m >= 1.0 && m.fract() == 0.0 => {}
                _ => return fail("cardinality needs a whole max of at least 1"),
            },
        }
        Ok(())
    }
}

fn default_confidence() -> f32 {
    1.0
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    id: String,
    #[serde(default)]
    priority: i32,
    when: Vec<String>,
    then: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    distinct: Vec<[String; 2]>,
    #[serde(default)]
    condition: Vec<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

impl RuleEntry {
    fn into_rule(self) -> Result<Rule> {
        let mut rule = Rule::parse(&self.id, &self.when, &self.then)?
            .with_priority(self.priority)
            .with_confidence(self.confidence);
        for [a, b] in self.distinct {
            rule = rule.with_condition(Condition::Distinct(
                a.trim_start_matches('?').to_string(),
                b.trim_start_matches('?').to_string(),
            ));
        }
        for text in &self.condition {
            let condition = Condition::parse(text)
                .map_err(|e| NoemaError::Config(format!("Rule '{}': {}", self.id, e)))?;
            rule = rule.with_condition(condition);
        }
        Ok(rule)
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    version: String,
    #[serde(default, rename = "rule")]
    rules: Vec<RuleEntry>,
    #[serde(default, rename = "constraint")]
    constraints: Vec<Constraint>,
}

/// Versioned, validated collection of rules and constraints.
///
/// Rules are kept in firing order: priority descending, then id.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    version: String,
    rules: Vec<Rule>,
    constraints: Vec<Constraint>,
    fingerprint: String,
}

impl RuleSet {
    pub fn new(version: impl Into<String>, mut rules: Vec<Rule>, constraints: Vec<Constraint>) -> Result<Self> {
        let version = version.into();
        let mut ids = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !ids.insert(rule.id.clone()) {
                return Err(NoemaError::Config(format!("Duplicate rule id '{}'", rule.id)));
            }
        }
        let mut constraint_ids = HashSet::new();
        for constraint in &constraints {
            constraint.validate()?;
            if !constraint_ids.insert(constraint.id.clone()) {
                return Err(NoemaError::Config(format!(
                    "Duplicate constraint id '{}'",
                    constraint.id
                )));
            }
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        let mut description = version.clone();
        for rule in &rules {
            description.push_str(&format!("\n{} {} {:?}", rule, rule.confidence, rule.conditions));
        }
        for c in &constraints {
            description.push_str(&format!("\n{:?}", c));
        }
        let fingerprint = content_hash(&[description.as_bytes()], 16);

        Ok(Self {
            version,
            rules,
            constraints,
            fingerprint,
        })
    }

    pub fn empty() -> Self {
        Self {
            version: "0".to_string(),
            rules: Vec::new(),
            constraints: Vec::new(),
            fingerprint: content_hash(&[b"0"], 16),
        }
    }

    /// The rule set compiled into the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_RULES)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(text)?;
        let rules = file
            .rules
            .into_iter()
            .filter(|r| r.enabled)
            .map(RuleEntry::into_rule)
            .collect::<Result<Vec<_>>>()?;
        let constraints = file
            .constraints
            .into_iter()
            .map(|mut c| {
                c.predicate = normalize_label(&c.predicate);
                c
            })
            .collect();
        Self::new(file.version, rules, constraints)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            NoemaError::Config(format!("Failed to read rules {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Hash of the effective rules; changes whenever any rule does.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
