use super::request::ProcessingMode;
use crate::semantic::similarity::tokenize;
use serde::{Deserialize, Serialize};

const QUANTIFIERS: &[&str] = &["all", "every", "each", "some", "any", "none", "no", "only"];
const CONNECTIVES: &[&str] = &[
    "if", "then", "therefore", "implies", "because", "hence", "thus", "unless", "and", "or", "not",
];
const OPEN_ENDED: &[&str] = &[
    "how", "why", "explain", "describe", "tell", "discuss", "think", "opinion", "imagine",
    "suggest", "compare",
];

/// Surface features of the request text that steer adaptive mode selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeSignals {
    pub quantifiers: usize,
    pub connectives: usize,
    pub open_ended: usize,
    pub words: usize,
    /// The text parsed as an explicit reasoning goal.
    pub has_goal: bool,
    /// The store holds facts near the request's entities.
    pub has_relevant_facts: bool,
    pub semantic_available: bool,
}

impl ModeSignals {
    pub fn analyze(text: &str) -> Self {
        let tokens = tokenize(text);
        let count = |list: &[&str]| tokens.iter().filter(|t| list.contains(&t.as_str())).count();
        Self {
            quantifiers: count(QUANTIFIERS),
            connectives: count(CONNECTIVES),
            open_ended: count(OPEN_ENDED),
            words: tokens.len(),
            ..Self::default()
        }
    }

    pub fn with_goal(mut self, has_goal: bool) -> Self {
        self.has_goal = has_goal;
        self
    }

    pub fn with_relevant_facts(mut self, relevant: bool) -> Self {
        self.has_relevant_facts = relevant;
        self
    }

    pub fn with_semantic(mut self, available: bool) -> Self {
        self.semantic_available = available;
        self
    }

    pub fn is_logical(&self) -> bool {
        self.has_goal || self.quantifiers > 0 || self.connectives >= 2
    }
}

/// Mode to run: the hint if given and runnable, otherwise the adaptive pick.
/// A neural request without a semantic provider drops to symbolic.
pub fn select_mode(hint: Option<ProcessingMode>, signals: &ModeSignals) -> ProcessingMode {
    let wanted = match hint {
        Some(ProcessingMode::Adaptive) | None => adaptive(signals),
        Some(mode) => mode,
    };
    if !signals.semantic_available && wanted.uses_semantic() {
        return ProcessingMode::Symbolic;
    }
    wanted
}

fn adaptive(signals: &ModeSignals) -> ProcessingMode {
    if !signals.has_relevant_facts {
        return ProcessingMode::Neural;
    }
    let logical = signals.is_logical();
    let open = signals.open_ended > 0;
    match (logical, open) {
        (true, false) => ProcessingMode::Symbolic,
        (false, true) => ProcessingMode::Neural,
        _ => ProcessingMode::Hybrid,
    }
}
