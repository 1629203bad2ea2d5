//! Error kinds surfaced by the query pipeline.

use thiserror::Error;

use crate::embedder::EmbedderError;
use crate::generator::GenerationError;
use crate::models::RetrievedMatch;
use crate::store::StoreError;

/// Failure from the embedding or vector-store stage.
#[derive(Error, Debug)]
pub enum RetrievalSource {
    #[error(transparent)]
    Embedding(#[from] EmbedderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Main error type returned by [`RagPipeline::answer`](crate::pipeline::RagPipeline::answer).
#[derive(Error, Debug)]
pub enum RagError {
    /// Bad caller input; nothing was sent to any service.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Embedding or similarity search failed. Safe to retry later.
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalSource),

    /// The language model failed after retrieval succeeded.
    ///
    /// The retrieved matches are kept so callers can still show citations.
    #[error("generation failed: {source}")]
    Generation {
        #[source]
        source: GenerationError,
        matches: Vec<RetrievedMatch>,
    },

    /// Missing or invalid configuration at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RagError {
    /// HTTP status this error maps to at the request surface.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Retrieval(_) => 503,
            Self::Generation { .. } => 502,
            Self::Configuration(_) => 500,
        }
    }
}

impl From<EmbedderError> for RagError {
    fn from(e: EmbedderError) -> Self {
        Self::Retrieval(RetrievalSource::Embedding(e))
    }
}

impl From<StoreError> for RagError {
    fn from(e: StoreError) -> Self {
        Self::Retrieval(RetrievalSource::Store(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        assert_eq!(RagError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(
            RagError::from(EmbedderError::Timeout(Duration::from_secs(1))).status_code(),
            503
        );
        assert_eq!(
            RagError::from(StoreError::Unavailable("down".into())).status_code(),
            503
        );
        let generation = RagError::Generation {
            source: GenerationError::EmptyResponse,
            matches: Vec::new(),
        };
        assert_eq!(generation.status_code(), 502);
        assert_eq!(RagError::Configuration("x".into()).status_code(), 500);
    }

    #[test]
    fn test_messages_name_the_stage() {
        let err = RagError::from(EmbedderError::Service("quota".into()));
        assert_eq!(err.to_string(), "retrieval failed: embedding service failed: quota");
    }
}
