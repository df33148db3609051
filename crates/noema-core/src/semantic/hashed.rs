use super::provider::EmbeddingProvider;
use super::similarity::{normalize, tokenize};
use crate::error::Result;
use crate::types::Embedding;
use async_trait::async_trait;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// Stable across platforms and compiler versions, unlike `DefaultHasher`
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic embedding by feature hashing: each word token and each
/// character trigram of a token lands in a signed bucket. Texts sharing
/// words or word fragments end up close under cosine similarity.
#[derive(Debug, Clone)]
pub struct HashedEmbedding {
    dimension: usize,
}

impl HashedEmbedding {
    pub const WORD_WEIGHT: f32 = 1.0;
    pub const TRIGRAM_WEIGHT: f32 = 0.5;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    /// Synchronous form used by tests and benches.
    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0; self.dimension];
        for token in tokenize(text) {
            self.add_feature(&mut vector, &format!("w:{}", token), Self::WORD_WEIGHT);
            let padded: Vec<char> = format!(" {} ", token).chars().collect();
            for window in padded.windows(3) {
                let gram: String = window.iter().collect();
                self.add_feature(&mut vector, &format!("t:{}", gram), Self::TRIGRAM_WEIGHT);
            }
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashedEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbedding {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashed"
    }
}
