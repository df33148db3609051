use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Type alias for embedding vectors
pub type Embedding = Vec<f32>;

/// Hex SHA-256 over length-prefixed parts, truncated to `hex_len` characters.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` from colliding.
pub(crate) fn content_hash(parts: &[&[u8]], hex_len: usize) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(hex_len);
    digest
}

/// Lowercase, trim and hyphenate a label so spelling variants share one key.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Stable entity identifier derived from the canonical label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn from_label(label: &str) -> Self {
        EntityId(normalize_label(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(label: &str) -> Self {
        EntityId::from_label(label)
    }
}

/// Content-addressed fact identifier: hash of the triple plus its version.
///
/// Identical triples at identical versions always produce the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactId(String);

impl FactId {
    pub fn compute(subject: &Term, predicate: &str, object: &Term, version: u32) -> Self {
        let s = subject.key();
        let o = object.key();
        FactId(content_hash(
            &[
                s.as_bytes(),
                predicate.as_bytes(),
                o.as_bytes(),
                &version.to_le_bytes(),
            ],
            32,
        ))
    }

    /// Parse an id supplied by a caller (CLI, HTTP).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(FactId(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LearningEventId(pub(crate) String);

impl LearningEventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LearningEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one consolidation pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsolidationId(pub(crate) String);

impl ConsolidationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsolidationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subject or object position of a triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// Reference to a row in the entity table.
    Entity(EntityId),
    /// Plain value; numbers are kept as their textual form.
    Literal(String),
}

impl Term {
    pub fn entity(label: &str) -> Self {
        Term::Entity(EntityId::from_label(label))
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal(value.into())
    }

    /// Index key; prefixes keep entity `5` and literal `"5"` apart.
    pub fn key(&self) -> String {
        match self {
            Term::Entity(id) => format!("e:{}", id),
            Term::Literal(v) => format!("l:{}", v),
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        if let Some(rest) = key.strip_prefix("e:") {
            Some(Term::Entity(EntityId(rest.to_string())))
        } else {
            key.strip_prefix("l:").map(|rest| Term::Literal(rest.to_string()))
        }
    }

    pub fn as_entity(&self) -> Option<&EntityId> {
        match self {
            Term::Entity(id) => Some(id),
            Term::Literal(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Term::Literal(v) => v.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Term::Entity(_) => None,
        }
    }

    /// Human-facing value without the literal quoting.
    pub fn value(&self) -> &str {
        match self {
            Term::Entity(id) => id.as_str(),
            Term::Literal(v) => v.as_str(),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Entity(id) => write!(f, "{}", id),
            Term::Literal(v) => write!(f, "\"{}\"", v),
        }
    }
}

/// A named thing facts can point at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Derived from the canonical label.
    pub id: EntityId,

    /// Display form of the canonical label.
    pub label: String,

    /// Type tag ("concept", "person", "place", ...).
    pub kind: String,

    /// Alternative spellings resolved to this entity.
    pub aliases: BTreeSet<String>,

    /// Cached label embedding. Computed lazily and cleared when the label changes.
    pub embedding: Option<Embedding>,

    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(label: impl Into<String>, kind: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: EntityId::from_label(&label),
            label,
            kind: kind.into(),
            aliases: BTreeSet::new(),
            embedding: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    /// Change the display label. The old label becomes an alias and the
    /// cached embedding is dropped.
    pub fn relabel(&mut self, label: impl Into<String>) {
        let label = label.into();
        if label == self.label {
            return;
        }
        let old = std::mem::replace(&mut self.label, label);
        self.aliases.insert(old);
        self.aliases.remove(&self.label);
        self.embedding = None;
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.label.trim().is_empty() {
            return Err("Entity label must not be empty".to_string());
        }
        if self.label.len() > 256 {
            return Err(format!(
                "Entity label exceeds 256 characters ({} chars)",
                self.label.len()
            ));
        }
        if self.id.as_str().is_empty() {
            return Err("Entity id must not be empty".to_string());
        }
        if self.kind.trim().is_empty() {
            return Err("Entity kind must not be empty".to_string());
        }
        Ok(())
    }
}

/// How, when and why a fact entered the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Provenance {
    /// Stated by an external caller.
    Asserted { source: String },
    /// Produced by a rule firing over the listed premises.
    Derived { rule: String, premises: Vec<FactId> },
    /// Accepted by the constraint solver.
    Solver { constraint: String },
    /// Promoted from repeated interactions by a consolidation pass.
    Consolidated {
        consolidation: ConsolidationId,
        events: Vec<LearningEventId>,
    },
}

impl Provenance {
    pub fn asserted(source: impl Into<String>) -> Self {
        Provenance::Asserted {
            source: source.into(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Provenance::Asserted { source } => format!("asserted:{}", source),
            Provenance::Derived { rule, .. } => format!("derived:{}", rule),
            Provenance::Solver { constraint } => format!("solver:{}", constraint),
            Provenance::Consolidated { consolidation, .. } => {
                format!("consolidated:{}", consolidation)
            }
        }
    }
}

/// A committed subject-predicate-object assertion. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    pub id: FactId,
    pub subject: Term,
    pub predicate: String,
    pub object: Term,

    /// Clipped to [0, 1].
    pub confidence: f32,

    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,

    /// Starts at 1 and increments each time the triple is re-asserted.
    pub version: u32,

    /// The prior version this one replaced, if any.
    pub supersedes: Option<FactId>,
}

impl Fact {
    pub fn triple_key(&self) -> String {
        triple_key(&self.subject, &self.predicate, &self.object)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

pub(crate) fn triple_key(subject: &Term, predicate: &str, object: &Term) -> String {
    format!("{}\u{1f}{}\u{1f}{}", subject.key(), predicate, object.key())
}

/// A fact not yet committed. The store assigns id, version and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewFact {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
    pub confidence: f32,
    pub provenance: Provenance,
}

impl NewFact {
    pub fn new(subject: Term, predicate: &str, object: Term) -> Self {
        Self {
            subject,
            predicate: normalize_label(predicate),
            object,
            confidence: 1.0,
            provenance: Provenance::asserted("api"),
        }
    }

    /// Shorthand for an entity-to-entity triple.
    pub fn between(subject: &str, predicate: &str, object: &str) -> Self {
        Self::new(Term::entity(subject), predicate, Term::entity(object))
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.predicate.is_empty() {
            return Err("Predicate must not be empty".to_string());
        }
        if self.confidence.is_nan() {
            return Err("Confidence must be a number".to_string());
        }
        if self.confidence < 0.0 {
            return Err(format!(
                "Confidence must be non-negative, got {}",
                self.confidence
            ));
        }
        for term in [&self.subject, &self.object] {
            if term.value().trim().is_empty() {
                return Err("Subject and object must not be empty".to_string());
            }
        }
        Ok(())
    }

    pub fn clipped_confidence(&self) -> f32 {
        self.confidence.clamp(0.0, 1.0)
    }
}

impl fmt::Display for NewFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

/// Lifecycle marker kept beside each committed fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FactStatus {
    Active,
    Superseded { by: FactId },
    Retracted { at: DateTime<Utc> },
}

impl FactStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, FactStatus::Active)
    }
}

/// Query over the triple table. `None` positions are wildcards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FactPattern {
    pub subject: Option<Term>,
    pub predicate: Option<String>,
    pub object: Option<Term>,

    /// Also return superseded and retracted facts.
    pub include_inactive: bool,

    /// Caller limit; never exceeds the store's configured result cap.
    pub limit: Option<usize>,
}

impl FactPattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn subject(mut self, term: Term) -> Self {
        self.subject = Some(term);
        self
    }

    pub fn predicate(mut self, predicate: &str) -> Self {
        self.predicate = Some(normalize_label(predicate));
        self
    }

    pub fn object(mut self, term: Term) -> Self {
        self.object = Some(term);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn including_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.subject.is_none() && self.predicate.is_none() && self.object.is_none()
    }

    pub fn matches(&self, fact: &Fact) -> bool {
        self.subject.as_ref().map_or(true, |s| *s == fact.subject)
            && self.predicate.as_ref().map_or(true, |p| *p == fact.predicate)
            && self.object.as_ref().map_or(true, |o| *o == fact.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_id_is_content_addressed() {
        let a = FactId::compute(&Term::entity("dog"), "is-a", &Term::entity("mammal"), 1);
        let b = FactId::compute(&Term::entity("Dog"), "is-a", &Term::entity("mammal"), 1);
        let c = FactId::compute(&Term::entity("dog"), "is-a", &Term::entity("mammal"), 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 32);
        assert_eq!(FactId::parse(a.as_str()), Some(a));
    }

    #[test]
    fn test_entity_and_literal_keys_differ() {
        let e = Term::entity("5");
        let l = Term::literal("5");
        assert_ne!(e.key(), l.key());
        assert_eq!(Term::from_key(&e.key()), Some(e));
        assert_eq!(l.as_number(), Some(5.0));
    }

    #[test]
    fn test_relabel_clears_embedding() {
        let mut e = Entity::new("Paris", "place");
        e.embedding = Some(vec![1.0, 0.0]);
        e.relabel("Paris, France");
        assert!(e.embedding.is_none());
        assert!(e.aliases.contains("Paris"));
        e.embedding = Some(vec![1.0]);
        e.relabel("Paris, France");
        assert!(e.embedding.is_some());
    }

    #[test]
    fn test_new_fact_validation() {
        assert!(NewFact::between("a", "is-a", "b").validate().is_ok());
        assert!(NewFact::between("a", "", "b").validate().is_err());
        assert!(NewFact::between("a", "is-a", "b")
            .with_confidence(-0.1)
            .validate()
            .is_err());
        let f = NewFact::between("a", "is-a", "b").with_confidence(1.7);
        assert_eq!(f.clipped_confidence(), 1.0);
    }

    #[test]
    fn test_pattern_matching() {
        let fact = Fact {
            id: FactId::compute(&Term::entity("dog"), "is-a", &Term::entity("mammal"), 1),
            subject: Term::entity("dog"),
            predicate: "is-a".to_string(),
            object: Term::entity("mammal"),
            confidence: 1.0,
            provenance: Provenance::asserted("test"),
            created_at: Utc::now(),
            version: 1,
            supersedes: None,
        };
        assert!(FactPattern::any().matches(&fact));
        assert!(FactPattern::any().subject(Term::entity("dog")).matches(&fact));
        assert!(!FactPattern::any().predicate("part of").matches(&fact));
        assert!(FactPattern::any().predicate("IS A").matches(&fact));
    }
}
