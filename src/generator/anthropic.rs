use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationError, Generator, SamplingParams};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic messages API.
pub struct AnthropicGenerator {
    client: Client,
    endpoint: String,
    model: String,
    sampling: SamplingParams,
    timeout: Duration,
}

impl AnthropicGenerator {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        sampling: SamplingParams,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| GenerationError::Service("invalid Anthropic API key".to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| GenerationError::Service(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
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
impl Generator for AnthropicGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: self.sampling.max_tokens,
            temperature: self.sampling.temperature,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: prompt,
                }],
            }],
        };
        debug!(endpoint = %self.endpoint, model = %self.model, "calling messages API");
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
                "Anthropic returned {status}: {text}"
            )));
        }
        let parsed: AnthropicResponse = resp.json().await.map_err(|e| self.map_transport(e))?;
        let answer = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text),
                AnthropicResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if answer.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(answer)
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
