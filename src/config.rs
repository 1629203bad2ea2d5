/// Configuration module for metarag.
///
/// Handles loading, validating, and providing default configuration values.
/// Values come from a JSON file first, then `.env` / process environment
/// variables override them. The result is immutable for the process lifetime.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::RagError;
use crate::generator::SamplingParams;
use crate::pipeline::{PipelineSettings, StageTimeouts};

pub const DEFAULT_CONFIG_PATH: &str = "metarag.json";

// ── Default value functions ──────────────────────────────────────────

fn default_dataset() -> String {
    "analytics_metadata".to_string()
}

fn default_table() -> String {
    "metadata_embeddings".to_string()
}

fn default_location() -> String {
    "US".to_string()
}

fn default_db_path() -> String {
    "./metadata.db".to_string()
}

fn default_pool_size() -> u32 {
    4
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    20
}

fn default_context_budget() -> usize {
    6000
}

fn default_embedding_provider() -> EmbeddingProvider {
    EmbeddingProvider::OpenAi
}

fn default_embed_model() -> String {
    "text-embedding-004".to_string()
}

fn default_dimensions() -> usize {
    768
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_anthropic_base() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_llm_provider() -> LlmProvider {
    LlmProvider::OpenAi
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> usize {
    1024
}

fn default_embed_timeout() -> u64 {
    15
}

fn default_search_timeout() -> u64 {
    10
}

fn default_generate_timeout() -> u64 {
    60
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Identifiers of the upstream metadata dataset. Informational only.
#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default = "default_dataset")]
    pub dataset: String,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_location")]
    pub location: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Context budget in characters.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[serde(rename = "openai")]
    OpenAi,
    /// Offline hashing embedder; no network calls.
    Mock,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_embed_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_openai_base")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: LlmProvider,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Overrides the provider's default endpoint when set.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default)]
    pub api_key: Option<String>,
}

/// Per-stage timeouts in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_embed_timeout")]
    pub embed_secs: u64,

    #[serde(default = "default_search_timeout")]
    pub search_secs: u64,

    #[serde(default = "default_generate_timeout")]
    pub generate_secs: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            dataset: default_dataset(),
            table: default_table(),
            location: default_location(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            context_budget: default_context_budget(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embed_model(),
            dimensions: default_dimensions(),
            base_url: default_openai_base(),
            api_key: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embed_secs: default_embed_timeout(),
            search_secs: default_search_timeout(),
            generate_secs: default_generate_timeout(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file and the environment.
    ///
    /// A missing file is not an error: defaults are used. A file that exists
    /// but does not parse is reported, since serving with silently different
    /// settings is worse than not starting.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        let mut cfg = if Path::new(path).exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {path}"))?;
            let cfg: Config = serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON in {path}"))?;
            info!("Loaded configuration from {path}");
            cfg
        } else {
            info!("{path} not found, using defaults");
            Self::default()
        };

        match dotenvy::dotenv() {
            Ok(env_path) => info!("Loaded environment from {}", env_path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("Failed to read .env: {e}"),
        }

        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply environment-style overrides from `lookup`.
    ///
    /// Split out from [`load`](Self::load) so tests need not touch the real
    /// process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GCP_PROJECT_ID") {
            self.project.project_id = Some(v);
        }
        if let Some(v) = get("BQ_DATASET") {
            self.project.dataset = v;
        }
        if let Some(v) = get("BQ_TABLE") {
            self.project.table = v;
        }
        if let Some(v) = get("BQ_LOCATION") {
            self.project.location = v;
        }
        if let Some(v) = get("METARAG_DB_PATH") {
            self.store.db_path = v;
        }
        if let Some(v) = get("METARAG_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("METARAG_OPENAI_BASE") {
            self.embedding.base_url = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("METARAG_LLM_PROVIDER") {
            self.llm.provider = match v.trim().to_ascii_lowercase().as_str() {
                "openai" => LlmProvider::OpenAi,
                "anthropic" => LlmProvider::Anthropic,
                other => anyhow::bail!("METARAG_LLM_PROVIDER: unknown provider {other}"),
            };
        }
        if let Some(v) = get("TOP_K_RESULTS") {
            self.search.top_k = v
                .trim()
                .parse()
                .with_context(|| format!("TOP_K_RESULTS: not a number: {v}"))?;
        }
        if let Some(v) = get("CONTEXT_BUDGET") {
            self.search.context_budget = v
                .trim()
                .parse()
                .with_context(|| format!("CONTEXT_BUDGET: not a number: {v}"))?;
        }
        if let Some(v) = get("TEMPERATURE") {
            self.llm.temperature = v
                .trim()
                .parse()
                .with_context(|| format!("TEMPERATURE: not a number: {v}"))?;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.embedding.api_key = Some(v.clone());
            if self.llm.provider == LlmProvider::OpenAi {
                self.llm.api_key = Some(v);
            }
        }
        if let Some(v) = get("ANTHROPIC_API_KEY") {
            if self.llm.provider == LlmProvider::Anthropic {
                self.llm.api_key = Some(v);
            }
        }
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), RagError> {
        fn ensure(cond: bool, msg: &str) -> Result<(), RagError> {
            if cond {
                Ok(())
            } else {
                Err(RagError::Configuration(msg.to_string()))
            }
        }

        ensure(self.search.top_k > 0, "search.top_k must be positive")?;
        ensure(
            self.search.max_top_k >= self.search.top_k,
            "search.max_top_k must be at least search.top_k",
        )?;
        ensure(
            self.search.context_budget > 0,
            "search.context_budget must be positive",
        )?;
        ensure(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive",
        )?;
        ensure(self.store.pool_size > 0, "store.pool_size must be positive")?;
        ensure(
            !self.embedding.model.trim().is_empty(),
            "embedding.model must not be empty",
        )?;
        ensure(!self.llm.model.trim().is_empty(), "llm.model must not be empty")?;
        ensure(
            (0.0..=2.0).contains(&self.llm.temperature),
            "llm.temperature must be within [0, 2]",
        )?;
        ensure(self.llm.max_tokens > 0, "llm.max_tokens must be positive")?;
        ensure(
            self.timeouts.embed_secs > 0
                && self.timeouts.search_secs > 0
                && self.timeouts.generate_secs > 0,
            "timeouts must be positive",
        )?;
        if self.embedding.provider == EmbeddingProvider::OpenAi {
            ensure(
                has_value(self.embedding.api_key.as_deref()),
                "OPENAI_API_KEY is required for the openai embedding provider",
            )?;
        }
        ensure(
            has_value(self.llm.api_key.as_deref()),
            match self.llm.provider {
                LlmProvider::OpenAi => "OPENAI_API_KEY is required for the openai llm provider",
                LlmProvider::Anthropic => {
                    "ANTHROPIC_API_KEY is required for the anthropic llm provider"
                }
            },
        )?;
        Ok(())
    }

    /// Base URL for the configured language model provider.
    #[must_use]
    pub fn llm_base_url(&self) -> String {
        match (&self.llm.base_url, self.llm.provider) {
            (Some(url), _) => url.clone(),
            (None, LlmProvider::OpenAi) => default_openai_base(),
            (None, LlmProvider::Anthropic) => default_anthropic_base(),
        }
    }

    #[must_use]
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
        }
    }

    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            context_budget: self.search.context_budget,
            timeouts: StageTimeouts {
                embed: Duration::from_secs(self.timeouts.embed_secs),
                search: Duration::from_secs(self.timeouts.search_secs),
                generate: Duration::from_secs(self.timeouts.generate_secs),
            },
        }
    }

    /// Resolve a caller-supplied `k`: absent means `top_k`, values above
    /// `max_top_k` are capped, zero or negative is rejected.
    pub fn resolve_k(&self, requested: Option<i64>) -> Result<usize, RagError> {
        let Some(k) = requested else {
            return Ok(self.search.top_k);
        };
        if k <= 0 {
            return Err(RagError::InvalidInput(format!(
                "k must be a positive integer, got {k}"
            )));
        }
        let cap = self.search.max_top_k.max(1);
        Ok(usize::try_from(k).map_or(cap, |k| k.min(cap)))
    }
}

fn has_value(v: Option<&str>) -> bool {
    v.is_some_and(|s| !s.trim().is_empty())
}

// ── Tests ────────────────────────────────────────────────────────────
