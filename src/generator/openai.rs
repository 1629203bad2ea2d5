use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationError, Generator, SamplingParams};

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    sampling: SamplingParams,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        sampling: SamplingParams,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| GenerationError::Service("invalid OpenAI API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| GenerationError::Service(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            sampling,
            timeout,
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout(self.timeout)
        } else {
            GenerationError::Service(err.to_string())
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        debug!(endpoint = %self.endpoint, model = %self.model, "calling chat completions");
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Service(format!(
                "OpenAI returned {status}: {text}"
            )));
        }
        let parsed: ChatResponse = resp.json().await.map_err(|e| self.map_transport(e))?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
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
    async fn test_generate_reads_first_choice() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["messages"][0]["role"], "user");
                assert_eq!(body["max_tokens"], 256);
                Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "Use report [1]." } }]
                }))
            }),
        );
        let base = spawn_fake(router).await;
        let sampling = SamplingParams {
            temperature: 0.1,
            max_tokens: 256,
        };
        let generator =
            OpenAiGenerator::new("sk-test", &base, "gpt-4o-mini", sampling, Duration::from_secs(5))
                .unwrap();
        assert_eq!(generator.generate("prompt").await.unwrap(), "Use report [1].");
    }

    #[tokio::test]
    async fn test_generate_error_status() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let base = spawn_fake(router).await;
        let generator = OpenAiGenerator::new(
            "sk-test",
            &base,
            "m",
            SamplingParams::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = generator.generate("prompt").await.unwrap_err();
        assert!(matches!(err, GenerationError::Service(ref m) if m.contains("overloaded")));
    }
}
