use super::similarity::cosine_similarity;
use crate::error::{NoemaError, Result};
use crate::types::{Embedding, EntityId};
use instant_distance::{Builder, HnswMap, Point, Search};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Below this many vectors an exact scan is used even when a graph exists.
const EXACT_SCAN_LIMIT: usize = 256;

const HNSW_SEED: u64 = 0x6e6f_656d_61;

/// One hit from a nearest-entity search.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch {
    pub entity_id: EntityId,
    /// Cosine similarity, clamped to [0, 1].
    pub score: f32,
}

#[derive(Clone, Debug)]
struct EmbeddingPoint(Vec<f32>);

impl Point for EmbeddingPoint {
    fn distance(&self, other: &Self) -> f32 {
        1.0 - cosine_similarity(&self.0, &other.0)
    }
}

/// Nearest-neighbour lookup over entity label embeddings.
///
/// Inserts go to a flat map immediately; the HNSW graph is only refreshed by
/// [`EntityIndex::rebuild`]. Until then searches fall back to an exact scan,
/// so a freshly inserted entity is never missed.
pub struct EntityIndex {
    index: Option<HnswMap<EmbeddingPoint, EntityId>>,
    vectors: HashMap<EntityId, Embedding>,
    dimension: usize,
    stale: bool,
}

fn rank(results: &mut [EntityMatch]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
}

impl EntityIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            index: None,
            vectors: HashMap::new(),
            dimension,
            stale: false,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn insert(&mut self, id: EntityId, embedding: Embedding) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(NoemaError::Validation(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        self.vectors.insert(id, embedding);
        self.stale = true;
        Ok(())
    }

    pub fn remove(&mut self, id: &EntityId) {
        if self.vectors.remove(id).is_some() {
            self.stale = true;
        }
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.vectors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
        self.index = None;
        self.stale = false;
    }

    /// Rebuild the graph from the current vectors. Points are fed in id
    /// order with a fixed seed, so the same contents give the same graph.
    pub fn rebuild(&mut self) {
        self.stale = false;
        if self.vectors.len() < EXACT_SCAN_LIMIT {
            self.index = None;
            return;
        }
        let mut entries: Vec<(&EntityId, &Embedding)> = self.vectors.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let (points, values): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .map(|(id, v)| (EmbeddingPoint(v.clone()), id.clone()))
            .unzip();
        self.index = Some(Builder::default().seed(HNSW_SEED).build(points, values));
    }

    fn exact_search(&self, query: &[f32], k: usize) -> Vec<EntityMatch> {
        let mut results: Vec<EntityMatch> = self
            .vectors
            .iter()
            .map(|(id, v)| EntityMatch {
                entity_id: id.clone(),
                score: cosine_similarity(query, v).max(0.0),
            })
            .collect();
        rank(&mut results);
        results.truncate(k);
        results
    }

    /// The `k` most similar entities, best first, ties broken by id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<EntityMatch>> {
        if query.len() != self.dimension {
            return Err(NoemaError::Validation(format!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimension,
                query.len()
            )));
        }
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let index = match &self.index {
            Some(index) if !self.stale => index,
            _ => return Ok(self.exact_search(query, k)),
        };

        let query_point = EmbeddingPoint(query.to_vec());
        let mut search = Search::default();
        let mut results: Vec<EntityMatch> = index
            .search(&query_point, &mut search)
            .take(k)
            .map(|item| EntityMatch {
                entity_id: item.value.clone(),
                score: (1.0 - item.distance).clamp(0.0, 1.0),
            })
            .collect();
        rank(&mut results);
        Ok(results)
    }

    /// All entities scoring at least `threshold`.
    pub fn search_threshold(&self, query: &[f32], threshold: f32) -> Result<Vec<EntityMatch>> {
        Ok(self
            .search(query, self.vectors.len())?
            .into_iter()
            .filter(|m| m.score >= threshold)
            .collect())
    }

    /// Parallel search for several queries.
    pub fn search_batch(&self, queries: &[Embedding], k: usize) -> Result<Vec<Vec<EntityMatch>>> {
        queries.par_iter().map(|q| self.search(q, k)).collect()
    }
}
