//! Answer generation over an assembled context.
//!
//! [`Generator`] is the language-model boundary: one prompt string in, one
//! answer string out. [`AnswerGenerator`] owns the prompt layout.
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::AssembledContext;
use crate::models::Query;

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicGenerator;
pub use openai::OpenAiGenerator;

/// Instruction placed ahead of every prompt.
pub const SYSTEM_INSTRUCTION: &str = "You are an enterprise analytics assistant. \
Answer only using the provided analytics metadata about reports and metrics. \
Cite the numbered sources you rely on, for example [1]. \
If the context is insufficient or the answer is not found in it, say so instead of guessing. \
Be concise and specific in your responses.";

/// Errors that can occur while calling the language model.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("language model service failed: {0}")]
    Service(String),

    #[error("language model timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("language model returned no text")]
    EmptyResponse,
}

/// Sampling settings passed to every provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1024,
        }
    }
}

/// Trait implemented by concrete LLM providers.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Build the full prompt: instruction, then context, then the question.
#[must_use]
pub fn build_prompt(query: &Query, context: &AssembledContext) -> String {
    format!(
        "{SYSTEM_INSTRUCTION}\n\nContext (Analytics Metadata):\n{}\n\nUser question: {}",
        context.text,
        query.text.trim()
    )
}

/// Produces answers for a query grounded on an assembled context.
#[derive(Clone)]
pub struct AnswerGenerator {
    backend: Arc<dyn Generator>,
}

impl AnswerGenerator {
    pub fn new(backend: Arc<dyn Generator>) -> Self {
        Self { backend }
    }

    pub async fn generate(
        &self,
        query: &Query,
        context: &AssembledContext,
    ) -> Result<String, GenerationError> {
        let prompt = build_prompt(query, context);
        let answer = self.backend.generate(&prompt).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(answer.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        prompts: Mutex<Vec<String>>,
        reply: String,
    }

    #[async_trait]
    impl Generator for Recording {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn context(text: &str) -> AssembledContext {
        AssembledContext {
            text: text.to_string(),
            included: vec![1],
            truncated: false,
        }
    }

    #[test]
    fn test_prompt_order() {
        let prompt = build_prompt(&Query::new(" Which report shows churn? "), &context("1. churn"));
        let sys = prompt.find(SYSTEM_INSTRUCTION).unwrap();
        let ctx = prompt.find("Context (Analytics Metadata):\n1. churn").unwrap();
        let q = prompt.find("User question: Which report shows churn?").unwrap();
        assert!(sys < ctx && ctx < q);
        assert!(prompt.ends_with("churn?"));
    }

    #[tokio::test]
    async fn test_generate_trims_answer() {
        let backend = Arc::new(Recording {
            prompts: Mutex::new(Vec::new()),
            reply: "  Use the Churn dashboard [1].\n".to_string(),
        });
        let generator = AnswerGenerator::new(backend.clone());
        let answer = generator
            .generate(&Query::new("churn?"), &context("1. churn"))
            .await
            .unwrap();
        assert_eq!(answer, "Use the Churn dashboard [1].");
        assert_eq!(backend.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_answer_is_error() {
        let backend = Arc::new(Recording {
            prompts: Mutex::new(Vec::new()),
            reply: "   ".to_string(),
        });
        let generator = AnswerGenerator::new(backend);
        let err = generator
            .generate(&Query::new("q"), &context("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse));
    }
}
