pub mod types;
pub mod storage;
pub mod store;
pub mod error;
pub mod config;
pub mod kinds;
pub mod relations;
pub mod semantic;
pub mod reasoning;
pub mod pipeline;
pub mod learning;
pub mod engine;

pub use error::{NoemaError, ReasonCode, Result};
pub use types::*;
pub use config::{
    EngineConfig, ExclusivityRule, FusionWeights, LearningConfig, PipelineConfig,
    ReasoningConfig, SemanticConfig, StoreConfig, TiePolicy,
};
pub use storage::{BackupHandle, RedbStorage, Storage, StorageStats, CURRENT_SCHEMA_VERSION};
pub use store::{corroborate, FactCursor, KnowledgeStore};
pub use semantic::{
    EmbeddingProvider, ExtractorProvider, HashedEmbedding, PatternExtractor, SemanticLayer,
};
pub use reasoning::{
    Answer, BoundsSolver, ConstraintSolver, ReasoningEngine, ReasoningOutcome, ReasoningQuery,
    ReasoningState, Rule, RuleSet,
};
pub use pipeline::{
    AnswerSource, Pipeline, PipelineRequest, PipelineResult, PipelineStats, ProcessingMode,
};
pub use learning::{
    ConsolidationReport, Interaction, LearningEvent, LearningMetrics, LearningModule, Outcome,
};
pub use engine::{Engine, EngineStats};
