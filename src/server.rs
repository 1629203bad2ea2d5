//! HTTP request surface: `GET /`, `GET /health` and `POST /ask`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::error::RagError;
use crate::models::{AnswerResult, AnswerStatus, Query, RecordType};
use crate::pipeline::RagPipeline;

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: RagPipeline,
    pub config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default, rename = "type")]
    pub record_type: Option<RecordType>,
    /// Signed so that a negative value is a 400, not a decode failure.
    #[serde(default)]
    pub k: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    #[serde(flatten)]
    pub result: AnswerResult,
    /// True when retrieval worked but the language model did not.
    pub degraded: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ask", post(ask))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let addr: SocketAddr = state
        .config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", state.config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("metarag listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    let project = &state.config.project;
    Json(json!({
        "message": "Analytics Metadata RAG Search API",
        "dataset": format!("{}.{}", project.dataset, project.table),
        "endpoints": {
            "/ask": "POST - Ask a question about analytics metadata",
            "/health": "GET - Health check"
        }
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(error_response(&RagError::InvalidInput(
            "query must not be empty".to_string(),
        )));
    }
    let k = state
        .config
        .resolve_k(request.k)
        .map_err(|e| error_response(&e))?;
    let query = Query::new(request.query)
        .with_domain(request.domain)
        .with_record_type(request.record_type);

    let result = state
        .pipeline
        .answer_or_sentinel(&query, k)
        .await
        .map_err(|e| error_response(&e))?;

    let degraded = result.status == AnswerStatus::Unavailable;
    Ok(Json(AskResponse { result, degraded }))
}

fn error_response(err: &RagError) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::generator::{AnswerGenerator, GenerationError, Generator};
    use crate::models::MetadataRecord;
    use crate::pipeline::PipelineSettings;
    use crate::store::MemoryVectorStore;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl Generator for Fixed {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| GenerationError::Service("model offline".to_string()))
        }
    }

    async fn spawn(generator: Fixed) -> String {
        let embedder = MockEmbedder::new(32);
        let mut store = MemoryVectorStore::new(32);
        for (id, text, domain) in [
            ("r1", "Quarterly sales pipeline report", "sales"),
            ("r2", "Sales win rate metric", "sales"),
            ("m1", "Campaign attribution report", "marketing"),
        ] {
            let record = MetadataRecord::new(id, text)
                .with_field("domain", domain)
                .with_field("type", "report");
            store.insert(record, embedder.embed_sync(text).unwrap()).unwrap();
        }
        let pipeline = RagPipeline::new(
            Arc::new(embedder),
            Arc::new(store),
            AnswerGenerator::new(Arc::new(generator)),
            PipelineSettings::default(),
        );
        let state = AppState {
            pipeline,
            config: Arc::new(Config::default()),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let base = spawn(Fixed(Some("ok"))).await;
        let health: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let root: Value = reqwest::get(format!("{base}/")).await.unwrap().json().await.unwrap();
        assert_eq!(root["dataset"], "analytics_metadata.metadata_embeddings");
    }

    #[tokio::test]
    async fn test_ask_with_domain_filter() {
        let base = spawn(Fixed(Some("Use the pipeline report [1]."))).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/ask"))
            .json(&json!({ "query": "sales pipeline", "domain": "sales", "k": 5 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["answer"], "Use the pipeline report [1].");
        assert_eq!(body["num_matches"], 2);
        assert_eq!(body["degraded"], false);
        for m in body["matches"].as_array().unwrap() {
            assert_eq!(m["metadata"]["domain"], "sales");
            assert!(m["page_content"].is_string());
        }
    }

    #[tokio::test]
    async fn test_ask_empty_query_is_400() {
        let base = spawn(Fixed(Some("unused"))).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/ask"))
            .json(&json!({ "query": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_ask_non_positive_k_is_400() {
        let base = spawn(Fixed(Some("unused"))).await;
        let client = reqwest::Client::new();
        for k in [0, -3] {
            let resp = client
                .post(format!("{base}/ask"))
                .json(&json!({ "query": "sales pipeline", "k": k }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 400, "k = {k}");
            let body: Value = resp.json().await.unwrap();
            assert!(body["message"].as_str().unwrap().contains("k must be a positive integer"));
        }
    }

    #[tokio::test]
    async fn test_ask_large_k_is_capped() {
        let base = spawn(Fixed(Some("ok"))).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/ask"))
            .json(&json!({ "query": "sales pipeline", "k": 10_000 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["num_matches"], 3);
    }

    #[tokio::test]
    async fn test_ask_llm_outage_returns_matches() {
        let base = spawn(Fixed(None)).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/ask"))
            .json(&json!({ "query": "campaign attribution" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["degraded"], true);
        assert_eq!(body["status"], "unavailable");
        assert_eq!(body["num_matches"], 3);
        assert_eq!(body["matches"].as_array().unwrap().len(), 3);
    }
}
