//! Embedding client for OpenAI-compatible `/embeddings` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError, prepare_input};

/// Async embeddings client. One request per query, no retries.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
}

impl OpenAiEmbedder {
    /// Builds a new embeddings client.
    ///
    /// `dimensions` is sent with every request and checked against each
    /// response, so it must match the vector store's index.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedderError> {
        if api_key.trim().is_empty() {
            return Err(EmbedderError::InvalidInput("missing API key".to_string()));
        }
        if model.trim().is_empty() {
            return Err(EmbedderError::InvalidInput("missing model name".to_string()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| EmbedderError::InvalidInput("invalid API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbedderError::Service(format!("failed to build HTTP client: {e}")))?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            dimensions,
            timeout,
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> EmbedderError {
        if err.is_timeout() {
            EmbedderError::Timeout(self.timeout)
        } else {
            EmbedderError::Service(err.to_string())
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let text = prepare_input(text)?;
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: self.dimensions,
        };
        debug!(endpoint = %self.endpoint, model = %self.model, "requesting query embedding");

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbedderError::Service(format!(
                "embeddings request failed ({status}): {body}"
            )));
        }

        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                EmbedderError::Timeout(self.timeout)
            } else {
                EmbedderError::MalformedResponse(e.to_string())
            }
        })?;
        let embedding = parsed
            .data
            .into_iter()
            .min_by_key(|entry| entry.index)
            .map(|entry| entry.embedding)
            .ok_or_else(|| EmbedderError::MalformedResponse("no embedding returned".to_string()))?;

        if embedding.len() != self.dimensions {
            return Err(EmbedderError::MalformedResponse(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    async fn spawn_fake(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn test_embed_parses_response() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["input"][0], "revenue by region");
                assert_eq!(body["dimensions"], 3);
                Json(json!({ "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }] }))
            }),
        );
        let base = spawn_fake(router).await;
        let embedder =
            OpenAiEmbedder::new("sk-test", &base, "text-embedding-004", 3, Duration::from_secs(5))
                .unwrap();

        let v = embedder.embed("  revenue by region ").await.unwrap();
        assert_eq!(v, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_embed_server_error_is_service_error() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "quota exceeded") }),
        );
        let base = spawn_fake(router).await;
        let embedder =
            OpenAiEmbedder::new("sk-test", &base, "m", 3, Duration::from_secs(5)).unwrap();

        let err = embedder.embed("q").await.unwrap_err();
        assert!(matches!(err, EmbedderError::Service(ref m) if m.contains("quota")));
    }

    #[tokio::test]
    async fn test_embed_wrong_dimensions_is_malformed() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|| async { Json(json!({ "data": [{ "embedding": [1.0], "index": 0 }] })) }),
        );
        let base = spawn_fake(router).await;
        let embedder =
            OpenAiEmbedder::new("sk-test", &base, "m", 3, Duration::from_secs(5)).unwrap();

        let err = embedder.embed("q").await.unwrap_err();
        assert!(matches!(err, EmbedderError::MalformedResponse(_)));
    }

    #[test]
    fn test_new_requires_api_key() {
        let err = OpenAiEmbedder::new(" ", "http://localhost", "m", 3, Duration::from_secs(1));
        assert!(err.is_err());
    }
}
