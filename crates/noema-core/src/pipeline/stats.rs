use super::request::{PipelineResult, ProcessingMode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters, updated lock-free from concurrent requests.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    total: AtomicU64,
    succeeded: AtomicU64,
    degraded: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    neural: AtomicU64,
    symbolic: AtomicU64,
    hybrid: AtomicU64,
    integrated_facts: AtomicU64,
    total_ms: AtomicU64,
}

impl PipelineCounters {
    pub fn record(&self, result: &PipelineResult, elapsed_ms: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        if result.cached {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        let outcome = if result.is_failure() {
            &self.failed
        } else if result.degraded {
            &self.degraded
        } else {
            &self.succeeded
        };
        outcome.fetch_add(1, Ordering::Relaxed);
        let mode = match result.mode_used {
            ProcessingMode::Neural => &self.neural,
            ProcessingMode::Symbolic | ProcessingMode::Adaptive => &self.symbolic,
            ProcessingMode::Hybrid => &self.hybrid,
        };
        mode.fetch_add(1, Ordering::Relaxed);
        self.integrated_facts
            .fetch_add(result.integrated.len() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        let total = self.total.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        PipelineStats {
            total,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            neural: self.neural.load(Ordering::Relaxed),
            symbolic: self.symbolic.load(Ordering::Relaxed),
            hybrid: self.hybrid.load(Ordering::Relaxed),
            integrated_facts: self.integrated_facts.load(Ordering::Relaxed),
            avg_ms: if total == 0 {
                0.0
            } else {
                total_ms as f64 / total as f64
            },
        }
    }
}

/// Point-in-time view of [`PipelineCounters`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total: u64,
    pub succeeded: u64,
    /// Answered, but through a fallback path.
    pub degraded: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub neural: u64,
    pub symbolic: u64,
    pub hybrid: u64,
    pub integrated_facts: u64,
    pub avg_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonCode;

    #[test]
    fn test_counts_by_outcome_and_mode() {
        let counters = PipelineCounters::default();
        let failed = PipelineResult::failure(ProcessingMode::Neural, ReasonCode::InvalidInput, "empty");
        counters.record(&failed, 4);
        let mut hit = failed.clone();
        hit.cached = true;
        counters.record(&hit, 0);

        let stats = counters.snapshot();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.neural, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert!((stats.avg_ms - 2.0).abs() < 1e-9);
    }
}
