use super::provider::EmbeddingProvider;
use crate::error::{NoemaError, Result};
use crate::types::Embedding;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;

/// ONNX sentence embeddings through FastEmbed. Inference runs on the blocking
/// thread pool so it never stalls the async executor.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Load a model by its Hugging Face name, e.g. `BAAI/bge-small-en-v1.5`.
    pub fn new(model: &str) -> Result<Self> {
        let (choice, dimension) = match model {
            "BAAI/bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            "BAAI/bge-large-en-v1.5" => (EmbeddingModel::BGELargeENV15, 1024),
            "sentence-transformers/all-MiniLM-L6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "sentence-transformers/all-MiniLM-L12-v2" => (EmbeddingModel::AllMiniLML12V2, 384),
            _ => (EmbeddingModel::BGESmallENV15, 384),
        };
        let model_instance = TextEmbedding::try_new(InitOptions::new(choice))
            .map_err(|e| NoemaError::provider("fastembed", format!("init failed: {}", e)))?;

        Ok(Self {
            model: Arc::new(model_instance),
            model_name: model.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| NoemaError::provider("fastembed", "no embedding generated"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let model = self.model.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| NoemaError::provider("fastembed", format!("worker failed: {}", e)))?
            .map_err(|e| NoemaError::provider("fastembed", format!("embedding failed: {}", e)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires downloading model
    async fn test_fastembed_dimension() {
        let provider = FastEmbedProvider::new("BAAI/bge-small-en-v1.5").unwrap();
        let v = provider.embed("a test sentence").await.unwrap();
        assert_eq!(v.len(), provider.dimension());
    }
}
