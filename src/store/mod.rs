//! Vector store capability and shared ranking policy.
//!
//! Every backend filters the candidate pool first and ranks second, so a
//! filter never leaves `k` under-filled while matching records exist.
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{MetadataRecord, RecordType, RetrievedMatch};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// Errors that can occur during vector store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("query vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    #[error("vector store timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        Self::Unavailable(format!("connection pool: {e}"))
    }
}

/// Metadata predicate applied before similarity ranking.
///
/// All set fields must match; an empty filter admits every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub domain: Option<String>,
    pub record_type: Option<RecordType>,
}

impl SearchFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domain.is_none() && self.record_type.is_none()
    }

    #[must_use]
    pub fn matches(&self, record: &MetadataRecord) -> bool {
        if let Some(domain) = &self.domain {
            if record.domain().as_deref() != Some(domain.as_str()) {
                return false;
            }
        }
        if let Some(record_type) = self.record_type {
            if record.record_type() != Some(record_type) {
                return false;
            }
        }
        true
    }
}

/// Trait for similarity search backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `k` records most similar to `vector`, best first.
    ///
    /// Fewer than `k` results (including none) is not an error.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievedMatch>, StoreError>;

    /// Dimensionality of the stored embeddings.
    fn dimensions(&self) -> usize;
}

/// Reject `k == 0` and vectors of the wrong length.
pub fn validate_request(vector: &[f32], k: usize, dimensions: usize) -> Result<(), StoreError> {
    if k == 0 {
        return Err(StoreError::InvalidInput("k must be greater than zero".to_string()));
    }
    if vector.len() != dimensions {
        return Err(StoreError::DimensionMismatch {
            expected: dimensions,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Order scored candidates by descending score, ties by ascending id,
/// keep the first `k` and number them from 1.
///
/// NaN scores are dropped.
#[must_use]
pub fn rank_candidates(candidates: Vec<(MetadataRecord, f64)>, k: usize) -> Vec<RetrievedMatch> {
    let mut scored: Vec<_> = candidates
        .into_iter()
        .filter(|(_, score)| !score.is_nan())
        .collect();
    scored.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(k);
    scored
        .into_iter()
        .enumerate()
        .map(|(idx, (record, score))| RetrievedMatch {
            record,
            score,
            rank: idx + 1,
        })
        .collect()
}

/// True when every component is zero. Such a vector has no direction.
#[must_use]
pub fn is_zero_norm(vector: &[f32]) -> bool {
    vector.iter().all(|x| *x == 0.0)
}

/// Reject stored embeddings that cannot be ranked by cosine similarity.
pub fn validate_embedding(id: &str, embedding: &[f32], dimensions: usize) -> Result<(), StoreError> {
    if embedding.len() != dimensions {
        return Err(StoreError::DimensionMismatch {
            expected: dimensions,
            actual: embedding.len(),
        });
    }
    if is_zero_norm(embedding) {
        return Err(StoreError::InvalidInput(format!("embedding for {id} is all zeros")));
    }
    Ok(())
}

/// Cosine similarity of two equal-length vectors.
///
/// NaN if either is zero, matching sqlite-vec's NULL distance; such
/// candidates are dropped by [`rank_candidates`].
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return f64::NAN;
    }
    dot / (na.sqrt() * nb.sqrt())
}
