use crate::error::Result;
use crate::types::Embedding;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Byte range into the analysed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub span: Span,
    pub text: String,
    /// Type tag, see [`crate::kinds::defaults`].
    pub kind: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub subject: String,
    pub subject_span: Span,
    pub subject_kind: String,
    pub predicate: String,
    pub object: String,
    pub object_span: Span,
    pub object_kind: String,
    pub confidence: f32,
}

/// Output of one extractor call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Turns text into vectors. Implementations may be slow or remote; callers
/// wrap every call in a timeout.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Finds entities and relations in text.
#[async_trait]
pub trait ExtractorProvider: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Extraction>;

    fn name(&self) -> &str;
}
