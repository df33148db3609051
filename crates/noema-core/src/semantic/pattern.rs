//! Regex-based entity and relation extraction.
//!
//! Relation patterns run per sentence and the first one that matches wins, so
//! "X is part of Y" never also reads as "X is a (part of Y)". Entity patterns
//! run over the whole text; a span already claimed by an earlier pattern is
//! not reported twice.

use super::provider::{ExtractedEntity, ExtractedRelation, Extraction, ExtractorProvider, Span};
use super::similarity::is_stop_word;
use crate::error::{NoemaError, Result};
use crate::kinds::defaults as kinds;
use crate::relations::defaults as rel;
use async_trait::async_trait;
use regex::Regex;

const ENTITY_CONFIDENCE: f32 = 0.4;
const RELATION_CONFIDENCE: f32 = 0.6;
const MAX_PHRASE_WORDS: usize = 6;

const QUESTION_WORDS: &[&str] = &["what", "who", "whom", "which", "why", "how", "when", "where"];

/// `(predicate, pattern, swap)`; `swap` means the `s` group holds the object.
const RELATION_PATTERNS: &[(&str, &str, bool)] = &[
    (
        rel::CAPITAL_OF,
        r"(?i)^the\s+capital\s+(?:city\s+)?of\s+(?P<s>.+?)\s+is\s+(?P<o>.+)$",
        true,
    ),
    (
        rel::CAPITAL_OF,
        r"(?i)^(?:is\s+)?(?P<s>.+?)\s+(?:is\s+)?the\s+capital\s+(?:city\s+)?of\s+(?P<o>.+)$",
        false,
    ),
    (
        rel::WORKS_FOR,
        r"(?i)^(?:does\s+)?(?P<s>.+?)\s+(?:works?|worked|is\s+working)\s+(?:for|at)\s+(?P<o>.+)$",
        false,
    ),
    (
        rel::LIVES_IN,
        r"(?i)^(?:does\s+)?(?P<s>.+?)\s+(?:lives?|lived|resides?)\s+in\s+(?P<o>.+)$",
        false,
    ),
    (
        rel::LOCATED_IN,
        r"(?i)^(?:is\s+)?(?P<s>.+?)\s+(?:is\s+)?(?:located|situated)\s+in\s+(?P<o>.+)$",
        false,
    ),
    (
        rel::PART_OF,
        r"(?i)^(?:is\s+)?(?P<s>.+?)\s+(?:is\s+|are\s+)?(?:a\s+)?part\s+of\s+(?P<o>.+)$",
        false,
    ),
    (
        rel::IS_A,
        r"(?i)^(?:is|are)\s+(?P<s>.+?)\s+(?:a|an)\s+(?P<o>.+)$",
        false,
    ),
    (
        rel::IS_A,
        r"(?i)^(?P<s>.+?)\s+(?:is|are)\s+(?:a|an)\s+(?P<o>.+)$",
        false,
    ),
    (
        rel::OWNS,
        r"(?i)^(?:does\s+)?(?P<s>.+?)\s+(?:owns?|owned)\s+(?P<o>.+)$",
        false,
    ),
    (
        rel::USES,
        r"(?i)^(?:does\s+)?(?P<s>.+?)\s+(?:uses?|used)\s+(?P<o>.+)$",
        false,
    ),
    (
        rel::HAS,
        r"(?i)^(?:does\s+)?(?P<s>.+?)\s+(?:has|have|had)\s+(?P<o>.+)$",
        false,
    ),
];

const ENTITY_PATTERNS: &[(&str, &str)] = &[
    (kinds::URL, r#"https?://[^\s<>"')\]]+"#),
    (kinds::EMAIL, r"[\w.+-]+@[\w-]+\.[\w.-]+"),
    (
        kinds::DATE,
        r"\b(?:\d{4}-\d{2}-\d{2}|(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2}(?:,\s*\d{4})?)\b",
    ),
    (
        kinds::PERSON,
        r"\b(?:Mr|Mrs|Ms|Dr|Prof)\.?\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*",
    ),
    (kinds::PROPER, r"\b[A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)*\b"),
    (kinds::NUMBER, r"\b\d+(?:\.\d+)?\b"),
];

struct RelationPattern {
    predicate: &'static str,
    regex: Regex,
    swap: bool,
}

/// Built-in [`ExtractorProvider`].
pub struct PatternExtractor {
    relations: Vec<RelationPattern>,
    entities: Vec<(&'static str, Regex)>,
    sentence: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| NoemaError::Config(format!("Bad extraction pattern: {}", e)))
}

impl PatternExtractor {
    pub fn new() -> Result<Self> {
        let relations = RELATION_PATTERNS
            .iter()
            .map(|(predicate, pattern, swap)| {
                Ok(RelationPattern {
                    predicate: *predicate,
                    regex: compile(pattern)?,
                    swap: *swap,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let entities = ENTITY_PATTERNS
            .iter()
            .map(|(kind, pattern)| Ok((*kind, compile(pattern)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            relations,
            entities,
            sentence: compile(r"[^.!?\n;]+")?,
        })
    }

    /// Trim articles and punctuation off a captured phrase. Returns the
    /// cleaned phrase with its span, or `None` if nothing meaningful is left.
    fn clean_phrase(text: &str, offset: usize) -> Option<(String, Span)> {
        let mut start = 0;
        let mut rest = text.trim_end_matches(|c: char| !c.is_alphanumeric());
        loop {
            let lowered = rest.to_lowercase();
            let stripped = ["the ", "a ", "an "]
                .iter()
                .find(|article| lowered.starts_with(*article))
                .map(|article| article.len());
            match stripped {
                Some(n) => {
                    start += n;
                    rest = &rest[n..];
                    let lead = rest.len() - rest.trim_start().len();
                    start += lead;
                    rest = &rest[lead..];
                }
                None => break,
            }
        }
        let rest = rest.trim();
        if rest.is_empty() || rest.split_whitespace().count() > MAX_PHRASE_WORDS {
            return None;
        }
        let lowered = rest.to_lowercase();
        if QUESTION_WORDS.contains(&lowered.as_str()) || is_stop_word(&lowered) {
            return None;
        }
        Some((rest.to_string(), Span::new(offset + start, offset + start + rest.len())))
    }

    fn extract_relations(&self, text: &str) -> Vec<ExtractedRelation> {
        let mut out = Vec::new();
        for sentence in self.sentence.find_iter(text) {
            let raw = sentence.as_str();
            let lead = raw.len() - raw.trim_start().len();
            let body = raw.trim();
            let base = sentence.start() + lead;
            let lowered = body.to_lowercase();
            let wh_question = QUESTION_WORDS
                .iter()
                .any(|w| lowered.starts_with(&format!("{} ", w)));

            for pattern in &self.relations {
                let Some(caps) = pattern.regex.captures(body) else {
                    continue;
                };
                let (Some(s), Some(o)) = (caps.name("s"), caps.name("o")) else {
                    continue;
                };
                if wh_question && pattern.predicate == rel::IS_A {
                    // "What is a dog" asks about an is-a relation, it does not state one
                    continue;
                }
                let (Some(subject), Some(object)) = (
                    Self::clean_phrase(s.as_str(), base + s.start()),
                    Self::clean_phrase(o.as_str(), base + o.start()),
                ) else {
                    continue;
                };
                let (subject, object) = if pattern.swap {
                    (object, subject)
                } else {
                    (subject, object)
                };
                out.push(ExtractedRelation {
                    subject: subject.0,
                    subject_span: subject.1,
                    subject_kind: kinds::CONCEPT.to_string(),
                    predicate: pattern.predicate.to_string(),
                    object: object.0,
                    object_span: object.1,
                    object_kind: kinds::CONCEPT.to_string(),
                    confidence: RELATION_CONFIDENCE,
                });
                break;
            }
        }
        out
    }

    fn extract_entities(&self, text: &str) -> Vec<ExtractedEntity> {
        let mut out: Vec<ExtractedEntity> = Vec::new();
        for (kind, regex) in &self.entities {
            for m in regex.find_iter(text) {
                let span = Span::new(m.start(), m.end());
                if out.iter().any(|e| e.span.overlaps(&span)) {
                    continue;
                }
                let value = m.as_str();
                if *kind == kinds::PROPER && value.split_whitespace().all(is_stop_word) {
                    continue;
                }
                out.push(ExtractedEntity {
                    span,
                    text: value.to_string(),
                    kind: kind.to_string(),
                    confidence: ENTITY_CONFIDENCE,
                });
            }
        }
        out.sort_by_key(|e| e.span);
        out
    }
}

#[async_trait]
impl ExtractorProvider for PatternExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction> {
        let mut entities = self.extract_entities(text);
        let mut relations = self.extract_relations(text);

        // Relation arguments inherit the kind of an overlapping entity and are
        // reported as entities themselves when nothing else covered them
        for relation in &mut relations {
            for (span, kind, value) in [
                (relation.subject_span, &mut relation.subject_kind, &relation.subject),
                (relation.object_span, &mut relation.object_kind, &relation.object),
            ] {
                match entities.iter().find(|e| e.span.overlaps(&span)) {
                    Some(e) => *kind = e.kind.clone(),
                    None => entities.push(ExtractedEntity {
                        span,
                        text: value.clone(),
                        kind: kinds::CONCEPT.to_string(),
                        confidence: ENTITY_CONFIDENCE,
                    }),
                }
            }
        }
        entities.sort_by_key(|e| e.span);

        Ok(Extraction {
            entities,
            relations,
        })
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relations(text: &str) -> Vec<(String, String, String)> {
        PatternExtractor::new()
            .unwrap()
            .extract_relations(text)
            .into_iter()
            .map(|r| (r.subject, r.predicate, r.object))
            .collect()
    }

    fn triple(s: &str, p: &str, o: &str) -> (String, String, String) {
        (s.to_string(), p.to_string(), o.to_string())
    }

    #[test]
    fn test_capital_statements_and_questions() {
        assert_eq!(
            relations("Paris is the capital of France."),
            vec![triple("Paris", "capital-of", "France")]
        );
        assert_eq!(
            relations("Is Paris the capital of France?"),
            vec![triple("Paris", "capital-of", "France")]
        );
        assert_eq!(
            relations("The capital of France is Paris"),
            vec![triple("Paris", "capital-of", "France")]
        );
    }

    #[test]
    fn test_is_a_and_part_of() {
        assert_eq!(relations("A dog is a mammal."), vec![triple("dog", "is-a", "mammal")]);
        assert_eq!(relations("Is a dog an animal?"), vec![triple("dog", "is-a", "animal")]);
        assert_eq!(
            relations("The wheel is part of the car"),
            vec![triple("wheel", "part-of", "car")]
        );
        assert!(relations("What is a qubit?").is_empty());
    }

    #[test]
    fn test_multiple_sentences() {
        let found = relations("Alice works for Acme. Bob lives in Berlin!");
        assert_eq!(
            found,
            vec![
                triple("Alice", "works-for", "Acme"),
                triple("Bob", "lives-in", "Berlin")
            ]
        );
    }

    #[tokio::test]
    async fn test_entities_and_spans() {
        let extractor = PatternExtractor::new().unwrap();
        let text = "Dr. Ada Lovelace wrote to ada@example.com on 1843-07-10 about 42 engines";
        let extraction = extractor.extract(text).await.unwrap();
        let kinds_found: Vec<&str> = extraction.entities.iter().map(|e| e.kind.as_str()).collect();
        assert!(kinds_found.contains(&"person"));
        assert!(kinds_found.contains(&"email"));
        assert!(kinds_found.contains(&"date"));
        assert!(kinds_found.contains(&"number"));
        for e in &extraction.entities {
            assert_eq!(&text[e.span.start..e.span.end], e.text);
            assert!((e.confidence - 0.4).abs() < f32::EPSILON);
        }
    }

    #[tokio::test]
    async fn test_relation_arguments_become_entities() {
        let extractor = PatternExtractor::new().unwrap();
        let text = "Paris is the capital of France";
        let extraction = extractor.extract(text).await.unwrap();
        let relation = &extraction.relations[0];
        assert_eq!(relation.subject_kind, "proper");
        assert_eq!(&text[relation.object_span.start..relation.object_span.end], "France");
        assert!((relation.confidence - 0.6).abs() < f32::EPSILON);
    }
}
