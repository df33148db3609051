//! Combining the symbolic and semantic answers.
//!
//! A symbolic answer that contradicts the semantic one and clears the
//! confidence threshold wins outright. Otherwise the two confidences are
//! blended, each weighted by its fusion weight and by itself, so the result
//! always lies between them. Confidences within `tie_epsilon` of each other
//! are a tie and the answer text follows the configured [`TiePolicy`].

use super::request::AnswerSource;
use crate::config::{FusionWeights, PipelineConfig, TiePolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One side's answer going into fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub answer: String,
    pub confidence: f32,
    /// Normalised values the answer asserts; disjoint claim sets contradict.
    pub claims: BTreeSet<String>,
    pub source: AnswerSource,
}

impl Candidate {
    pub fn new(answer: impl Into<String>, confidence: f32, source: AnswerSource) -> Self {
        Self {
            answer: answer.into(),
            confidence: sanitize(confidence),
            claims: BTreeSet::new(),
            source,
        }
    }

    pub fn with_claims(mut self, claims: impl IntoIterator<Item = String>) -> Self {
        self.claims = claims.into_iter().collect();
        self
    }

    fn weight(&self, weights: &FusionWeights) -> f32 {
        match self.source {
            AnswerSource::Semantic => weights.semantic,
            AnswerSource::Knowledge => weights.knowledge,
            _ => weights.reasoning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionRule {
    SymbolicOnly,
    SemanticOnly,
    /// Contradiction resolved for the confident symbolic side.
    SymbolicOverride,
    Blend,
    Tie,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fused {
    pub answer: String,
    pub confidence: f32,
    pub source: AnswerSource,
    pub rule: FusionRule,
    pub contradiction: bool,
}

pub fn contradicts(symbolic: &Candidate, semantic: &Candidate) -> bool {
    !symbolic.claims.is_empty()
        && !semantic.claims.is_empty()
        && symbolic.claims.is_disjoint(&semantic.claims)
}

pub fn fuse(symbolic: Option<&Candidate>, semantic: Option<&Candidate>, config: &PipelineConfig) -> Fused {
    let (symbolic, semantic) = match (symbolic, semantic) {
        (None, None) => {
            return Fused {
                answer: String::new(),
                confidence: 0.0,
                source: AnswerSource::None,
                rule: FusionRule::Empty,
                contradiction: false,
            }
        }
        (Some(s), None) => return single(s, FusionRule::SymbolicOnly),
        (None, Some(n)) => return single(n, FusionRule::SemanticOnly),
        (Some(s), Some(n)) => (s, n),
    };

    let contradiction = contradicts(symbolic, semantic);
    if contradiction && symbolic.confidence > config.confidence_threshold {
        return Fused {
            contradiction,
            ..single(symbolic, FusionRule::SymbolicOverride)
        };
    }

    let weights = config.weights.normalized();
    let confidence = blend(&[
        (symbolic.confidence, symbolic.weight(&weights)),
        (semantic.confidence, semantic.weight(&weights)),
    ]);

    let gap = symbolic.confidence - semantic.confidence;
    let (rule, symbolic_wins) = if gap.abs() <= config.tie_epsilon {
        (FusionRule::Tie, config.tie_policy == TiePolicy::FavorSymbolic)
    } else {
        (FusionRule::Blend, gap > 0.0)
    };
    let winner = if symbolic_wins { symbolic } else { semantic };
    let source = if contradiction { winner.source } else { AnswerSource::Blended };

    Fused {
        answer: winner.answer.clone(),
        confidence,
        source,
        rule,
        contradiction,
    }
}

fn single(candidate: &Candidate, rule: FusionRule) -> Fused {
    Fused {
        answer: candidate.answer.clone(),
        confidence: candidate.confidence,
        source: candidate.source,
        rule,
        contradiction: false,
    }
}

/// Σ w·c² / Σ w·c: each confidence weighted by its weight and by itself.
pub fn blend(parts: &[(f32, f32)]) -> f32 {
    let denominator: f32 = parts.iter().map(|(c, w)| c * w).sum();
    if denominator <= f32::EPSILON {
        return 0.0;
    }
    let numerator: f32 = parts.iter().map(|(c, w)| c * c * w).sum();
    sanitize(numerator / denominator)
}

pub fn sanitize(confidence: f32) -> f32 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
