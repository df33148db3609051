use crate::error::{NoemaError, Result};
use crate::relations;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration, usually the `[store]`, `[semantic]`,
/// `[reasoning]`, `[pipeline]` and `[learning]` sections of `noema.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub semantic: SemanticConfig,
    pub reasoning: ReasoningConfig,
    pub pipeline: PipelineConfig,
    pub learning: LearningConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NoemaError::Config(format!("Failed to read {:?}: {}", path.as_ref(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Keep everything in memory (tests, one-shot CLI runs).
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.store.in_memory = true;
        config
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store.data_dir = dir.into();
        self
    }

    /// Every problem found, empty when the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.store.validate());
        errors.extend(self.semantic.validate());
        errors.extend(self.reasoning.validate());
        errors.extend(self.pipeline.validate());
        errors.extend(self.learning.validate());
        errors
    }
}

/// Objects a subject may not hold together for one predicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExclusivityRule {
    /// At most one active object per subject.
    Functional { predicate: String },
    /// At most one object per subject drawn from `objects`.
    Disjoint {
        predicate: String,
        objects: Vec<String>,
    },
}

impl ExclusivityRule {
    pub fn predicate(&self) -> &str {
        match self {
            ExclusivityRule::Functional { predicate } => predicate,
            ExclusivityRule::Disjoint { predicate, .. } => predicate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the database and snapshots.
    /// Default: ./data
    pub data_dir: PathBuf,

    /// Use redb's in-memory backend instead of a file.
    pub in_memory: bool,

    /// Hard cap on facts returned by one `get`.
    /// Default: 10_000
    pub max_results: usize,

    /// Predicates whose graph must stay acyclic.
    pub acyclic_predicates: Vec<String>,

    pub exclusivity: Vec<ExclusivityRule>,

    /// `(s, <prefix>p, o)` contradicts `(s, p, o)`.
    /// Default: "not-"
    pub negation_prefix: String,

    /// Where snapshots go. Default: `<data_dir>/snapshots`.
    pub snapshot_dir: Option<PathBuf>,

    /// Snapshots kept after pruning.
    /// Default: 10
    pub keep_snapshots: usize,

    /// Background snapshot period; 0 disables.
    /// Default: 3600
    pub snapshot_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            in_memory: false,
            max_results: 10_000,
            acyclic_predicates: relations::defaults::acyclic(),
            exclusivity: vec![ExclusivityRule::Functional {
                predicate: relations::defaults::CAPITAL_OF.to_string(),
            }],
            negation_prefix: "not-".to_string(),
            snapshot_dir: None,
            keep_snapshots: 10,
            snapshot_interval_secs: 3600,
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("noema.redb")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("snapshots"))
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn with_exclusivity(mut self, rule: ExclusivityRule) -> Self {
        self.exclusivity.push(rule);
        self
    }

    pub fn snapshot_interval(&self) -> Option<Duration> {
        (self.snapshot_interval_secs > 0).then(|| Duration::from_secs(self.snapshot_interval_secs))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_results == 0 {
            errors.push("[store] max_results must be greater than 0".to_string());
        }
        if self.keep_snapshots == 0 {
            errors.push("[store] keep_snapshots must be at least 1".to_string());
        }
        if self.negation_prefix.is_empty() {
            errors.push("[store] negation_prefix must not be empty".to_string());
        }
        for rule in &self.exclusivity {
            if rule.predicate().is_empty() {
                errors.push("[store] exclusivity rule with empty predicate".to_string());
            }
            if let ExclusivityRule::Disjoint { predicate, objects } = rule {
                if objects.len() < 2 {
                    errors.push(format!(
                        "[store] disjoint rule for '{}' needs at least two objects",
                        predicate
                    ));
                }
            }
        }
        errors
    }
}

/// Which embedding provider to construct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum EmbeddingBackend {
    /// Deterministic feature hashing; no model download.
    Hashed { dimension: usize },
    /// FastEmbed ONNX model (requires the `fastembed` feature).
    #[serde(rename = "fastembed")]
    FastEmbed { model: String },
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        EmbeddingBackend::Hashed { dimension: 256 }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorBackend {
    /// Regex entity and relation patterns.
    #[default]
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SemanticConfig {
    pub embedding: EmbeddingBackend,
    pub extractor: ExtractorBackend,

    /// Embeddings kept in the LRU cache.
    /// Default: 1024
    pub cache_capacity: usize,

    /// Per-call provider timeout.
    /// Default: 2000
    pub provider_timeout_ms: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingBackend::default(),
            extractor: ExtractorBackend::default(),
            cache_capacity: 1024,
            provider_timeout_ms: 2000,
        }
    }
}

impl SemanticConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_provider_timeout_ms(mut self, ms: u64) -> Self {
        self.provider_timeout_ms = ms;
        self
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.cache_capacity == 0 {
            errors.push("[semantic] cache_capacity must be greater than 0".to_string());
        }
        if self.provider_timeout_ms == 0 {
            errors.push("[semantic] provider_timeout_ms must be greater than 0".to_string());
        }
        match &self.embedding {
            EmbeddingBackend::Hashed { dimension } if *dimension < 8 => {
                errors.push("[semantic] hashed embedding dimension must be at least 8".to_string())
            }
            EmbeddingBackend::FastEmbed { .. } if !cfg!(feature = "fastembed") => errors.push(
                "[semantic] fastembed backend requires building with the `fastembed` feature"
                    .to_string(),
            ),
            _ => {}
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Rule artifact to load; the embedded default set when absent.
    pub rules_path: Option<PathBuf>,

    /// Backward chaining recursion limit.
    /// Default: 10
    pub max_depth: usize,

    /// Rule firings allowed per invocation before giving up.
    /// Default: 10_000
    pub max_firings: usize,

    /// Derived facts below this confidence are dropped.
    /// Default: 0.1
    pub min_confidence: f32,

    /// Hard timeout on each constraint solver call.
    /// Default: 5000
    pub solver_timeout_ms: u64,

    /// Multiplier applied to the fallback answer after a solver timeout.
    /// Default: 0.5
    pub timeout_penalty: f32,

    /// How far from the request's entities working memory reaches.
    /// Default: 3
    pub relevance_hops: usize,

    /// Cap on facts loaded into working memory.
    /// Default: 5000
    pub max_working_facts: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            max_depth: 10,
            max_firings: 10_000,
            min_confidence: 0.1,
            solver_timeout_ms: 5000,
            timeout_penalty: 0.5,
            relevance_hops: 3,
            max_working_facts: 5000,
        }
    }
}

impl ReasoningConfig {
    pub fn solver_timeout(&self) -> Duration {
        Duration::from_millis(self.solver_timeout_ms)
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_firings(mut self, firings: usize) -> Self {
        self.max_firings = firings;
        self
    }

    pub fn with_solver_timeout_ms(mut self, ms: u64) -> Self {
        self.solver_timeout_ms = ms;
        self
    }

    pub fn with_timeout_penalty(mut self, penalty: f32) -> Self {
        self.timeout_penalty = penalty.clamp(0.0, 1.0);
        self
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_depth == 0 {
            errors.push("[reasoning] max_depth must be greater than 0".to_string());
        }
        if self.max_firings == 0 {
            errors.push("[reasoning] max_firings must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            errors.push("[reasoning] min_confidence must be within [0, 1]".to_string());
        }
        if !(0.0..1.0).contains(&self.timeout_penalty) {
            errors.push("[reasoning] timeout_penalty must be within [0, 1)".to_string());
        }
        if self.solver_timeout_ms == 0 {
            errors.push("[reasoning] solver_timeout_ms must be greater than 0".to_string());
        }
        errors
    }
}

/// Which answer wins when both sides score within `tie_epsilon`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TiePolicy {
    #[default]
    FavorSymbolic,
    FavorSemantic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionWeights {
    pub semantic: f32,
    pub knowledge: f32,
    pub reasoning: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.3,
            knowledge: 0.3,
            reasoning: 0.4,
        }
    }
}

impl FusionWeights {
    /// Weights rescaled to sum to one.
    pub fn normalized(&self) -> FusionWeights {
        let total = self.semantic + self.knowledge + self.reasoning;
        if total <= 0.0 {
            return FusionWeights::default();
        }
        FusionWeights {
            semantic: self.semantic / total,
            knowledge: self.knowledge / total,
            reasoning: self.reasoning / total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Symbolic answers above this win outright when they disagree with the
    /// semantic answer.
    /// Default: 0.7
    pub confidence_threshold: f32,

    pub tie_policy: TiePolicy,

    /// Confidence gap treated as a tie.
    /// Default: 0.05
    pub tie_epsilon: f32,

    /// Results kept in the request cache.
    /// Default: 500
    pub cache_capacity: usize,

    /// Overall budget for one `process` call.
    /// Default: 60_000
    pub max_processing_ms: u64,

    pub weights: FusionWeights,

    /// Commit derived facts at or above this confidence.
    /// Default: 0.8
    pub integrate_threshold: f32,

    /// Write accepted derived facts back to the store.
    /// Default: true
    pub integrate_derived: bool,

    /// Longest accepted request text.
    /// Default: 10_000
    pub max_input_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            tie_policy: TiePolicy::FavorSymbolic,
            tie_epsilon: 0.05,
            cache_capacity: 500,
            max_processing_ms: 60_000,
            weights: FusionWeights::default(),
            integrate_threshold: 0.8,
            integrate_derived: true,
            max_input_chars: 10_000,
        }
    }
}

impl PipelineConfig {
    pub fn max_processing(&self) -> Duration {
        Duration::from_millis(self.max_processing_ms)
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_tie_policy(mut self, policy: TiePolicy) -> Self {
        self.tie_policy = policy;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_integrate_derived(mut self, enabled: bool) -> Self {
        self.integrate_derived = enabled;
        self
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            errors.push("[pipeline] confidence_threshold must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.integrate_threshold) {
            errors.push("[pipeline] integrate_threshold must be within [0, 1]".to_string());
        }
        if self.tie_epsilon < 0.0 {
            errors.push("[pipeline] tie_epsilon must be non-negative".to_string());
        }
        if self.cache_capacity == 0 {
            errors.push("[pipeline] cache_capacity must be greater than 0".to_string());
        }
        if self.max_processing_ms == 0 {
            errors.push("[pipeline] max_processing_ms must be greater than 0".to_string());
        }
        if self.max_input_chars == 0 {
            errors.push("[pipeline] max_input_chars must be greater than 0".to_string());
        }
        let w = &self.weights;
        if w.semantic < 0.0 || w.knowledge < 0.0 || w.reasoning < 0.0 {
            errors.push("[pipeline] fusion weights must be non-negative".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearningConfig {
    /// Distinct interactions a candidate needs before promotion (N).
    /// Default: 5
    pub min_support: usize,

    /// DBSCAN neighbourhood radius in cosine distance.
    /// Default: 0.15
    pub cluster_eps: f32,

    /// Events scoring below this are recorded as discarded.
    /// Default: 0.3
    pub min_quality: f32,

    /// Pending events kept before the oldest are discarded.
    /// Default: 10_000
    pub max_pending: usize,

    /// Background consolidation period; 0 disables.
    /// Default: 300
    pub consolidation_interval_secs: u64,

    /// Unclustered pending events older than this are discarded.
    /// Default: 7 days
    pub max_event_age_secs: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_support: 5,
            cluster_eps: 0.15,
            min_quality: 0.3,
            max_pending: 10_000,
            consolidation_interval_secs: 300,
            max_event_age_secs: 7 * 24 * 3600,
        }
    }
}

impl LearningConfig {
    pub fn consolidation_interval(&self) -> Option<Duration> {
        (self.consolidation_interval_secs > 0)
            .then(|| Duration::from_secs(self.consolidation_interval_secs))
    }

    pub fn with_min_support(mut self, n: usize) -> Self {
        self.min_support = n;
        self
    }

    pub fn with_min_quality(mut self, quality: f32) -> Self {
        self.min_quality = quality.clamp(0.0, 1.0);
        self
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.min_support == 0 {
            errors.push("[learning] min_support must be at least 1".to_string());
        }
        if !(0.0..=2.0).contains(&self.cluster_eps) {
            errors.push("[learning] cluster_eps must be within [0, 2]".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_quality) {
            errors.push("[learning] min_quality must be within [0, 1]".to_string());
        }
        if self.max_pending == 0 {
            errors.push("[learning] max_pending must be greater than 0".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.pipeline.confidence_threshold, 0.7);
        assert_eq!(config.pipeline.cache_capacity, 500);
        assert_eq!(config.reasoning.max_depth, 10);
        assert_eq!(config.learning.min_support, 5);
    }

    #[test]
    fn test_parse_toml_sections() {
        let text = r#"
            [store]
            data_dir = "/tmp/noema-test"
            max_results = 50
            acyclic_predicates = ["is-a"]

            [[store.exclusivity]]
            kind = "disjoint"
            predicate = "state"
            objects = ["alive", "dead"]

            [semantic.embedding]
            backend = "hashed"
            dimension = 64

            [pipeline]
            tie_policy = "favor-semantic"

            [learning]
            min_support = 3
        "#;
        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.store.max_results, 50);
        assert_eq!(config.store.db_path(), PathBuf::from("/tmp/noema-test/noema.redb"));
        assert_eq!(
            config.store.exclusivity,
            vec![ExclusivityRule::Disjoint {
                predicate: "state".into(),
                objects: vec!["alive".into(), "dead".into()],
            }]
        );
        assert_eq!(config.semantic.embedding, EmbeddingBackend::Hashed { dimension: 64 });
        assert_eq!(config.pipeline.tie_policy, TiePolicy::FavorSemantic);
        assert_eq!(config.learning.min_support, 3);
        // untouched sections keep defaults
        assert_eq!(config.reasoning.max_firings, 10_000);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = EngineConfig::default();
        config.store.max_results = 0;
        config.learning.min_support = 0;
        config.pipeline.cache_capacity = 0;
        let errors = config.validate();
        assert_eq!(errors.len(), 3, "{:?}", errors);
    }

    #[test]
    fn test_builder_clamping() {
        let p = PipelineConfig::default().with_confidence_threshold(1.4);
        assert_eq!(p.confidence_threshold, 1.0);
        let r = ReasoningConfig::default().with_timeout_penalty(-1.0);
        assert_eq!(r.timeout_penalty, 0.0);
    }

    #[test]
    fn test_fusion_weights_normalize() {
        let w = FusionWeights {
            semantic: 1.0,
            knowledge: 1.0,
            reasoning: 2.0,
        }
        .normalized();
        assert!((w.semantic - 0.25).abs() < 1e-6);
        assert!((w.reasoning - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_dir_defaults_under_data_dir() {
        let store = StoreConfig {
            data_dir: PathBuf::from("/var/lib/noema"),
            ..StoreConfig::default()
        };
        assert_eq!(store.snapshot_dir(), PathBuf::from("/var/lib/noema/snapshots"));
    }
}
