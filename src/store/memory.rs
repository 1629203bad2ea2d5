/// In-process vector store with exact (brute-force) cosine search.
///
/// Holds a fixed set of records loaded at startup. Used for fixtures and
/// small catalogs where an on-disk index is not worth it.
use async_trait::async_trait;

use super::{
    SearchFilter, StoreError, VectorStore, cosine_similarity, rank_candidates, validate_embedding,
    validate_request,
};
use crate::models::{MetadataRecord, RetrievedMatch};

pub struct MemoryVectorStore {
    dimensions: usize,
    entries: Vec<(MetadataRecord, Vec<f32>)>,
}

impl MemoryVectorStore {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: Vec::new(),
        }
    }

    /// Add a record with its precomputed embedding.
    pub fn insert(&mut self, record: MetadataRecord, embedding: Vec<f32>) -> Result<(), StoreError> {
        validate_embedding(&record.id, &embedding, self.dimensions)?;
        self.entries.retain(|(r, _)| r.id != record.id);
        self.entries.push((record, embedding));
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievedMatch>, StoreError> {
        validate_request(vector, k, self.dimensions)?;

        let candidates = self
            .entries
            .iter()
            .filter(|(record, _)| filter.is_none_or(|f| f.matches(record)))
            .map(|(record, embedding)| (record.clone(), cosine_similarity(vector, embedding)))
            .collect();

        Ok(rank_candidates(candidates, k))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
