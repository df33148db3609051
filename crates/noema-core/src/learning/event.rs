use crate::types::{content_hash, normalize_label, ConsolidationId, FactId, LearningEventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller feedback on how an interaction went.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Outcome {
    /// Weight applied to extraction confidence when scoring an event.
    pub fn weight(&self) -> f32 {
        match self {
            Outcome::Positive => 1.0,
            Outcome::Neutral => 0.6,
            Outcome::Negative => 0.2,
        }
    }
}

/// Raw interaction as handed to `record_interaction`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub input: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub outcome: Outcome,
}

impl Interaction {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    /// Text candidates are extracted from.
    pub fn text(&self) -> String {
        match &self.response {
            Some(r) if !r.is_empty() => format!("{}\n{}", self.input, r),
            _ => self.input.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CandidateState {
    Pending,
    Promoted {
        consolidation: ConsolidationId,
        fact: FactId,
    },
    Rejected {
        reason: String,
    },
    Discarded,
}

/// One triple extracted from an interaction, awaiting consolidation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateFact {
    pub subject: String,
    pub subject_kind: String,
    pub predicate: String,
    pub object: String,
    pub object_kind: String,
    pub confidence: f32,
    pub state: CandidateState,
}

impl CandidateFact {
    /// Normalised form used to compare candidates across events.
    pub fn key(&self) -> String {
        format!(
            "{} {} {}",
            normalize_label(&self.subject),
            normalize_label(&self.predicate),
            normalize_label(&self.object)
        )
    }

    /// Text embedded for clustering.
    pub fn canonical_text(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate.replace('-', " "), self.object)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, CandidateState::Pending)
    }
}

impl fmt::Display for CandidateFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

/// A recorded interaction plus what was extracted from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningEvent {
    pub id: LearningEventId,

    /// Monotonic recording order.
    pub seq: u64,

    pub interaction: Interaction,
    pub candidates: Vec<CandidateFact>,

    /// Outcome weight times mean extraction confidence, in [0, 1].
    pub quality: f32,

    pub recorded_at: DateTime<Utc>,
}

impl LearningEvent {
    pub fn compute_id(interaction: &Interaction, seq: u64) -> LearningEventId {
        let context = interaction.context.join("\u{1e}");
        let response = interaction.response.clone().unwrap_or_default();
        LearningEventId(content_hash(
            &[
                interaction.input.as_bytes(),
                context.as_bytes(),
                response.as_bytes(),
                &seq.to_le_bytes(),
            ],
            24,
        ))
    }

    /// Still has candidates waiting for a consolidation pass.
    pub fn is_pending(&self) -> bool {
        self.candidates.iter().any(|c| c.is_pending())
    }

    pub fn discard_pending(&mut self) {
        for c in &mut self.candidates {
            if c.is_pending() {
                c.state = CandidateState::Discarded;
            }
        }
    }
}
