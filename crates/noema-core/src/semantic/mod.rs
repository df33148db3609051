pub mod cache;
#[cfg(feature = "fastembed")]
mod fastembed;
mod hashed;
mod index;
mod pattern;
mod provider;
pub mod similarity;

pub use cache::{CacheStats, LruCache};
#[cfg(feature = "fastembed")]
pub use fastembed::FastEmbedProvider;
pub use hashed::HashedEmbedding;
pub use index::{EntityIndex, EntityMatch};
pub use pattern::PatternExtractor;
pub use provider::{
    EmbeddingProvider, ExtractedEntity, ExtractedRelation, Extraction, ExtractorProvider, Span,
};
pub use similarity::{cosine_similarity, edit_distance, keywords};

use crate::config::{EmbeddingBackend, ExtractorBackend, SemanticConfig};
use crate::error::{NoemaError, Result};
use crate::store::KnowledgeStore;
use crate::types::{content_hash, Embedding, Entity};
use std::cmp::Ordering;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

fn cache_key(text: &str) -> String {
    content_hash(&[text.as_bytes()], 32)
}

/// A candidate scored against a query by [`SemanticLayer::rank`].
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub text: String,
    pub score: f32,
    pub edit_distance: usize,
}

/// Embedding, extraction and similarity over pluggable providers.
///
/// Owns the embedding cache and the entity index; the providers themselves
/// stay behind their capability traits. Every provider call is bounded by
/// the configured timeout and surfaces as `ProviderUnavailable` on failure.
pub struct SemanticLayer {
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Arc<dyn ExtractorProvider>,
    cache: Mutex<LruCache<String, Embedding>>,
    index: RwLock<EntityIndex>,
    timeout: Duration,
}

impl SemanticLayer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn ExtractorProvider>,
        config: &SemanticConfig,
    ) -> Self {
        let dimension = embedder.dimension();
        Self {
            embedder,
            extractor,
            cache: Mutex::new(LruCache::new(config.cache_capacity)),
            index: RwLock::new(EntityIndex::new(dimension)),
            timeout: config.provider_timeout(),
        }
    }

    /// Build the providers named in the config.
    pub fn from_config(config: &SemanticConfig) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = match &config.embedding {
            EmbeddingBackend::Hashed { dimension } => Arc::new(HashedEmbedding::new(*dimension)),
            #[cfg(feature = "fastembed")]
            EmbeddingBackend::FastEmbed { model } => Arc::new(FastEmbedProvider::new(model)?),
            #[cfg(not(feature = "fastembed"))]
            EmbeddingBackend::FastEmbed { .. } => {
                return Err(NoemaError::Config(
                    "fastembed backend requires the `fastembed` feature".to_string(),
                ))
            }
        };
        let extractor: Arc<dyn ExtractorProvider> = match config.extractor {
            ExtractorBackend::Pattern => Arc::new(PatternExtractor::new()?),
        };
        Ok(Self::new(embedder, extractor, config))
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.name()
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    async fn bounded<T>(
        &self,
        provider: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e @ NoemaError::ProviderUnavailable { .. })) => Err(e),
            Ok(Err(e)) => Err(NoemaError::provider(provider, e.to_string())),
            Err(_) => {
                log::warn!(
                    "Provider {} timed out after {}ms",
                    provider,
                    self.timeout.as_millis()
                );
                Err(NoemaError::provider(
                    provider,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                ))
            }
        }
    }

    /// Embedding for `text`, served from the cache when possible.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let key = cache_key(text);
        let cached = self.cache.lock()?.get(&key);
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let vector = self
            .bounded(self.embedder.name(), self.embedder.embed(text))
            .await?;
        if vector.len() != self.embedder.dimension() {
            return Err(NoemaError::provider(
                self.embedder.name(),
                format!(
                    "returned dimension {} instead of {}",
                    vector.len(),
                    self.embedder.dimension()
                ),
            ));
        }
        self.cache.lock()?.insert(key, vector.clone());
        Ok(vector)
    }

    /// Embeddings for several texts; only cache misses reach the provider.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let keys: Vec<String> = texts.iter().map(|t| cache_key(t)).collect();
        let mut out: Vec<Option<Embedding>> = {
            let mut cache = self.cache.lock()?;
            keys.iter().map(|k| cache.get(k)).collect()
        };
        let missing: Vec<usize> = (0..texts.len()).filter(|i| out[*i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|i| texts[*i].clone()).collect();
            let vectors = self
                .bounded(self.embedder.name(), self.embedder.embed_batch(&batch))
                .await?;
            if vectors.len() != batch.len() {
                return Err(NoemaError::provider(
                    self.embedder.name(),
                    format!("returned {} vectors for {} texts", vectors.len(), batch.len()),
                ));
            }
            let mut cache = self.cache.lock()?;
            for (i, vector) in missing.into_iter().zip(vectors) {
                cache.insert(keys[i].clone(), vector.clone());
                out[i] = Some(vector);
            }
        }
        Ok(out.into_iter().flatten().collect())
    }

    pub async fn extract(&self, text: &str) -> Result<Extraction> {
        self.bounded(self.extractor.name(), self.extractor.extract(text))
            .await
    }

    pub async fn extract_entities(&self, text: &str) -> Result<Vec<ExtractedEntity>> {
        Ok(self.extract(text).await?.entities)
    }

    pub async fn extract_relations(&self, text: &str) -> Result<Vec<ExtractedRelation>> {
        Ok(self.extract(text).await?.relations)
    }

    /// Cosine similarity of the two texts' embeddings.
    pub async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        let va = self.embed(a).await?;
        let vb = self.embed(b).await?;
        Ok(cosine_similarity(&va, &vb))
    }

    /// Candidates ordered by similarity to `query`. Equal scores fall back to
    /// edit distance, then to the candidate text, so the order is total.
    pub async fn rank(&self, query: &str, candidates: &[String]) -> Result<Vec<Ranked>> {
        let target = self.embed(query).await?;
        let vectors = self.embed_many(candidates).await?;
        let lowered = query.to_lowercase();
        let mut ranked: Vec<Ranked> = candidates
            .iter()
            .zip(vectors.iter())
            .map(|(text, v)| Ranked {
                text: text.clone(),
                score: cosine_similarity(&target, v),
                edit_distance: edit_distance(&lowered, &text.to_lowercase()),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.edit_distance.cmp(&b.edit_distance))
                .then_with(|| a.text.cmp(&b.text))
        });
        Ok(ranked)
    }

    pub fn keywords(&self, text: &str) -> Vec<String> {
        keywords(text)
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.cache.lock()?.stats())
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache.lock()?.clear();
        Ok(())
    }

    /// Add one entity to the index, computing and caching its label
    /// embedding on the entity when it has none yet.
    pub async fn index_entity(&self, store: &KnowledgeStore, entity: &Entity) -> Result<()> {
        let vector = match &entity.embedding {
            Some(v) if v.len() == self.dimension() => v.clone(),
            _ => {
                let v = self.embed(&entity.label).await?;
                store.set_entity_embedding(&entity.id, v.clone())?;
                v
            }
        };
        self.index.write()?.insert(entity.id.clone(), vector)
    }

    /// Reload the entity index from the store and rebuild its graph.
    /// Returns the number of indexed entities.
    pub async fn index_entities(&self, store: &KnowledgeStore) -> Result<usize> {
        let entities = store.entities()?;
        let missing: Vec<&Entity> = entities
            .iter()
            .filter(|e| e.embedding.as_ref().map(|v| v.len()) != Some(self.dimension()))
            .collect();
        let labels: Vec<String> = missing.iter().map(|e| e.label.clone()).collect();
        let computed = self.embed_many(&labels).await?;

        let mut index = EntityIndex::new(self.dimension());
        for entity in &entities {
            if let Some(v) = &entity.embedding {
                if v.len() == self.dimension() {
                    index.insert(entity.id.clone(), v.clone())?;
                }
            }
        }
        for (entity, vector) in missing.iter().zip(computed) {
            store.set_entity_embedding(&entity.id, vector.clone())?;
            index.insert(entity.id.clone(), vector)?;
        }
        index.rebuild();
        let count = index.len();
        *self.index.write()? = index;
        log::debug!("Indexed {} entities", count);
        Ok(count)
    }

    pub fn indexed_entities(&self) -> Result<usize> {
        Ok(self.index.read()?.len())
    }

    /// Entities whose labels are closest to `text`.
    pub async fn nearest_entities(&self, text: &str, k: usize) -> Result<Vec<EntityMatch>> {
        let query = self.embed(text).await?;
        self.nearest_to(&query, k)
    }

    pub fn nearest_to(&self, vector: &[f32], k: usize) -> Result<Vec<EntityMatch>> {
        self.index.read()?.search(vector, k)
    }
}
