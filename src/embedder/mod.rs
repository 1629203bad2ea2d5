/// Embedder trait and shared types for query embedding.
///
/// The pipeline only ever embeds one query string per request, so the trait
/// is a single async `embed` call. Retries are not done at this layer.
pub mod mock;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("embedding service failed: {0}")]
    Service(String),

    #[error("embedding service timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Trim `text` and reject it if nothing is left.
pub fn prepare_input(text: &str) -> Result<&str, EmbedderError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EmbedderError::InvalidInput(
            "text is empty after trimming".to_string(),
        ));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_input() {
        assert_eq!(prepare_input("  revenue  ").unwrap(), "revenue");
        assert!(matches!(
            prepare_input(" \n\t "),
            Err(EmbedderError::InvalidInput(_))
        ));
    }
}
