use crate::error::ReasonCode;
use crate::reasoning::{Answer, ReasoningTrace};
use crate::types::FactId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a request is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingMode {
    /// Semantic analysis only.
    Neural,
    /// Reasoning over the knowledge store only.
    Symbolic,
    /// Both, fused by confidence.
    Hybrid,
    /// Let the orchestrator pick one of the above.
    Adaptive,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Neural => "NEURAL",
            ProcessingMode::Symbolic => "SYMBOLIC",
            ProcessingMode::Hybrid => "HYBRID",
            ProcessingMode::Adaptive => "ADAPTIVE",
        }
    }

    pub fn uses_reasoning(&self) -> bool {
        matches!(self, ProcessingMode::Symbolic | ProcessingMode::Hybrid)
    }

    pub fn uses_semantic(&self) -> bool {
        matches!(self, ProcessingMode::Neural | ProcessingMode::Hybrid)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NEURAL" => Ok(ProcessingMode::Neural),
            "SYMBOLIC" => Ok(ProcessingMode::Symbolic),
            "HYBRID" => Ok(ProcessingMode::Hybrid),
            "ADAPTIVE" => Ok(ProcessingMode::Adaptive),
            other => Err(format!(
                "Unknown mode '{}', expected neural, symbolic, hybrid or adaptive",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub text: String,
    /// Earlier turns, oldest first.
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub mode_hint: Option<ProcessingMode>,
}

impl PipelineRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode_hint = Some(mode);
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    SemanticAnalysis,
    KnowledgeLookup,
    ModeSelection,
    Reasoning,
    Integration,
    Fusion,
    AnswerValidation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub ok: bool,
    /// What happened, for operators; empty when nothing notable.
    pub note: String,
}

/// Which side of the fusion produced the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Semantic,
    Knowledge,
    Reasoning,
    Blended,
    None,
}

/// What `process` hands back. Failures are results too: confidence drops and
/// `reason` carries a machine-readable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub answer: String,
    pub confidence: f32,
    /// Mode actually run; never `Adaptive`.
    pub mode_used: ProcessingMode,
    pub source: AnswerSource,
    /// Some stage fell back (provider down, solver timeout, proof search
    /// gave up) and the answer is partial.
    pub degraded: bool,
    pub reason: Option<ReasonCode>,
    /// Symbolic answers behind `answer`, empty in neural mode.
    pub facts: Vec<Answer>,
    pub trace: ReasoningTrace,
    pub explanation: Vec<String>,
    /// Derived facts written back to the store by this request.
    pub integrated: Vec<FactId>,
    pub stages: Vec<StageReport>,
    /// Served from the result cache.
    pub cached: bool,
}

impl PipelineResult {
    /// Zero-confidence result for a request that could not be processed.
    pub fn failure(mode: ProcessingMode, reason: ReasonCode, message: impl Into<String>) -> Self {
        let mode_used = match mode {
            ProcessingMode::Adaptive => ProcessingMode::Symbolic,
            other => other,
        };
        Self {
            answer: message.into(),
            confidence: 0.0,
            mode_used,
            source: AnswerSource::None,
            degraded: true,
            reason: Some(reason),
            facts: Vec::new(),
            trace: ReasoningTrace::new(),
            explanation: Vec::new(),
            integrated: Vec::new(),
            stages: Vec::new(),
            cached: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.source == AnswerSource::None && self.reason.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("symbolic".parse::<ProcessingMode>(), Ok(ProcessingMode::Symbolic));
        assert_eq!("HYBRID".parse::<ProcessingMode>(), Ok(ProcessingMode::Hybrid));
        assert!("quantum".parse::<ProcessingMode>().is_err());
        assert_eq!(ProcessingMode::Neural.to_string(), "NEURAL");
        assert_eq!(
            serde_json::to_string(&ProcessingMode::Adaptive).unwrap(),
            "\"ADAPTIVE\""
        );
    }

    #[test]
    fn test_failure_never_reports_adaptive() {
        let r = PipelineResult::failure(ProcessingMode::Adaptive, ReasonCode::InvalidInput, "empty");
        assert_eq!(r.mode_used, ProcessingMode::Symbolic);
        assert_eq!(r.confidence, 0.0);
        assert!(r.is_failure());
    }
}
