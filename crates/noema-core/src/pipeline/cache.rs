use super::request::{PipelineRequest, PipelineResult};
use crate::semantic::{CacheStats, LruCache};
use crate::types::content_hash;

/// Recent results keyed by request content and store generation. Any commit
/// bumps the generation, so stale answers are never served.
pub struct ResultCache {
    entries: LruCache<String, PipelineResult>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn key(request: &PipelineRequest, generation: u64) -> String {
        let context = request.context.join("\u{1e}");
        let mode = request.mode_hint.map(|m| m.as_str()).unwrap_or("-");
        content_hash(
            &[
                request.text.trim().as_bytes(),
                context.as_bytes(),
                mode.as_bytes(),
                &generation.to_le_bytes(),
            ],
            32,
        )
    }

    pub fn get(&mut self, key: &str) -> Option<PipelineResult> {
        self.entries.get(&key.to_string()).map(|mut r| {
            r.cached = true;
            r
        })
    }

    pub fn put(&mut self, key: String, result: PipelineResult) {
        self.entries.insert(key, result);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.stats()
    }
}
