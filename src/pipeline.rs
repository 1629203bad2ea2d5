/// Retrieval-augmented answer pipeline.
///
/// One query runs strictly in sequence: embed → search → assemble → generate.
/// No state is shared between queries and nothing is retried here; each
/// service call gets its own timeout, reported as that stage's error.
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::context::assemble;
use crate::embedder::{Embedder, EmbedderError};
use crate::error::RagError;
use crate::generator::{AnswerGenerator, GenerationError};
use crate::models::{AnswerResult, Query};
use crate::store::{SearchFilter, StoreError, VectorStore};

/// Independent time limits for the three service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub embed: Duration,
    pub search: Duration,
    pub generate: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            embed: Duration::from_secs(15),
            search: Duration::from_secs(10),
            generate: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Maximum context size in characters.
    pub context_budget: usize,
    pub timeouts: StageTimeouts,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            context_budget: 6000,
            timeouts: StageTimeouts::default(),
        }
    }
}

/// Composes embedder, store and generator into a single `answer` call.
#[derive(Clone)]
pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    generator: AnswerGenerator,
    settings: PipelineSettings,
}

async fn with_timeout<T, E>(
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(limit)),
    }
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        generator: AnswerGenerator,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            generator,
            settings,
        }
    }

    /// Answer `query` from the top `k` matching metadata records.
    pub async fn answer(&self, query: &Query, k: usize) -> Result<AnswerResult, RagError> {
        if query.text.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }
        if k == 0 {
            return Err(RagError::InvalidInput("k must be greater than zero".to_string()));
        }

        let started = Instant::now();
        let timeouts = self.settings.timeouts;

        let vector = with_timeout(
            timeouts.embed,
            self.embedder.embed(&query.text),
            EmbedderError::Timeout,
        )
        .await
        .inspect_err(|e| warn!("query embedding failed: {e}"))?;

        let filter = SearchFilter {
            domain: query.domain.clone(),
            record_type: query.record_type,
        };
        let filter = (!filter.is_empty()).then_some(filter);
        let matches = with_timeout(
            timeouts.search,
            self.store.search(&vector, k, filter.as_ref()),
            StoreError::Timeout,
        )
        .await
        .inspect_err(|e| warn!("metadata search failed: {e}"))?;

        if matches.is_empty() {
            info!(
                query_len = query.text.len(),
                k,
                domain = ?query.domain,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "no metadata matched; skipping generation"
            );
            return Ok(AnswerResult::no_matches());
        }

        let context = assemble(&matches, self.settings.context_budget);

        let answer = with_timeout(
            timeouts.generate,
            self.generator.generate(query, &context),
            GenerationError::Timeout,
        )
        .await;

        match answer {
            Ok(answer) => {
                info!(
                    query_len = query.text.len(),
                    k,
                    domain = ?query.domain,
                    num_matches = matches.len(),
                    context_blocks = context.included.len(),
                    context_truncated = context.truncated,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "answered query"
                );
                Ok(AnswerResult::answered(answer, matches))
            }
            Err(source) => {
                warn!(num_matches = matches.len(), "answer generation failed: {source}");
                Err(RagError::Generation { source, matches })
            }
        }
    }

    /// Like [`answer`](Self::answer), but a generation failure becomes the
    /// "answer unavailable" sentinel with the retrieved matches attached.
    pub async fn answer_or_sentinel(&self, query: &Query, k: usize) -> Result<AnswerResult, RagError> {
        match self.answer(query, k).await {
            Err(RagError::Generation { matches, .. }) => Ok(AnswerResult::unavailable(matches)),
            other => other,
        }
    }
}
