/// Mock embedder for offline runs and tests.
///
/// Uses the hashing trick over lowercase word tokens, so texts that share
/// words land close together. Good enough to exercise ranking end to end
/// without a network service.
use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;

use super::{Embedder, EmbedderError, prepare_input};

/// A mock embedder that produces deterministic bag-of-words vectors.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Synchronous form of [`Embedder::embed`], handy for building fixtures.
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let text = prepare_input(text)?;
        let mut embedding = vec![0.0f32; self.dimensions.max(1)];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % embedding.len() as u64) as usize;
            embedding[bucket] += 1.0;
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 768 }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_mock_embed_dimensions() {
        let embedder = MockEmbedder::new(384);
        let result = embedder.embed("hello world").await.unwrap();
        assert_eq!(result.len(), 384);
    }

    #[tokio::test]
    async fn test_mock_embed_deterministic() {
        let embedder = MockEmbedder::new(384);
        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("hello").await.unwrap();
        assert_eq!(a, b, "same input should produce same output");
    }

    #[tokio::test]
    async fn test_mock_embed_rejects_blank() {
        let embedder = MockEmbedder::default();
        let err = embedder.embed("   ").await.unwrap_err();
        assert!(matches!(err, EmbedderError::InvalidInput(_)));
    }

    #[test]
    fn test_mock_embed_normalized() {
        let embedder = MockEmbedder::new(384);
        let vec = embedder.embed_sync("test normalization").unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
    }

    #[test]
    fn test_shared_words_are_closer() {
        let embedder = MockEmbedder::new(512);
        let query = embedder.embed_sync("monthly revenue").unwrap();
        let near = embedder.embed_sync("Monthly revenue by region").unwrap();
        let far = embedder.embed_sync("employee onboarding checklist").unwrap();
        assert!(dot(&query, &near) > dot(&query, &far));
    }
}
