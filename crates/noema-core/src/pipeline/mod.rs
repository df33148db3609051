//! Request/response orchestration.
//!
//! Stages run in order: validate, semantic analysis (embedding and
//! extraction concurrently), knowledge lookup, mode selection, reasoning,
//! integration of derived facts, fusion and answer validation.

pub mod cache;
pub mod fusion;
pub mod mode;
pub mod orchestrator;
pub mod query;
pub mod request;
pub mod stats;

pub use cache::ResultCache;
pub use fusion::{fuse, Candidate, Fused, FusionRule};
pub use mode::{select_mode, ModeSignals};
pub use orchestrator::Pipeline;
pub use query::{GoalSyntax, ParsedGoal, QueryParser};
pub use request::{
    AnswerSource, PipelineRequest, PipelineResult, ProcessingMode, Stage, StageReport,
};
pub use stats::{PipelineCounters, PipelineStats};
