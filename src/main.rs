use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use metarag::config::{Config, EmbeddingProvider, LlmProvider};
use metarag::embedder::Embedder;
use metarag::embedder::mock::MockEmbedder;
use metarag::embedder::openai::OpenAiEmbedder;
use metarag::generator::{AnswerGenerator, AnthropicGenerator, Generator, OpenAiGenerator};
use metarag::import::import_file;
use metarag::mcp::server::{McpContext, McpServer};
use metarag::models::{Query, RecordType};
use metarag::pipeline::RagPipeline;
use metarag::server::{AppState, serve};
use metarag::store::SqliteVectorStore;

#[derive(Parser, Debug)]
#[command(
    name = "metarag",
    version,
    about = "Conversational search over analytics report and metric metadata"
)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, short, global = true, default_value = metarag::config::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (/, /health, /ask).
    Serve {
        /// Override the bind address (host:port).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Serve the MCP tools over stdio.
    Mcp,
    /// Ask a single question and print the JSON result.
    Ask {
        query: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long = "type")]
        record_type: Option<RecordType>,
        #[arg(long, short, allow_negative_numbers = true)]
        k: Option<i64>,
    },
    /// Load pre-embedded records (JSONL) into the metadata store.
    Import { file: PathBuf },
}

fn init_tracing() {
    // stderr keeps stdout free for the MCP transport and `ask` output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn open_store(config: &Config) -> Result<SqliteVectorStore> {
    SqliteVectorStore::open(
        &config.store.db_path,
        config.embedding.dimensions,
        config.store.pool_size,
    )
    .context("Failed to open metadata store")
}

fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    Ok(match config.embedding.provider {
        EmbeddingProvider::Mock => Arc::new(MockEmbedder::new(config.embedding.dimensions)),
        EmbeddingProvider::OpenAi => Arc::new(
            OpenAiEmbedder::new(
                config.embedding.api_key.as_deref().unwrap_or_default(),
                &config.embedding.base_url,
                &config.embedding.model,
                config.embedding.dimensions,
                config.pipeline_settings().timeouts.embed,
            )
            .context("Failed to build embedding client")?,
        ),
    })
}

fn build_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    let api_key = config.llm.api_key.as_deref().unwrap_or_default();
    let base_url = config.llm_base_url();
    let timeout = config.pipeline_settings().timeouts.generate;
    Ok(match config.llm.provider {
        LlmProvider::OpenAi => Arc::new(
            OpenAiGenerator::new(api_key, &base_url, &config.llm.model, config.sampling(), timeout)
                .context("Failed to build OpenAI client")?,
        ),
        LlmProvider::Anthropic => Arc::new(
            AnthropicGenerator::new(api_key, &base_url, &config.llm.model, config.sampling(), timeout)
                .context("Failed to build Anthropic client")?,
        ),
    })
}

fn build_pipeline(config: &Config) -> Result<RagPipeline> {
    config.validate()?;
    let store = open_store(config)?;
    Ok(RagPipeline::new(
        build_embedder(config)?,
        Arc::new(store),
        AnswerGenerator::new(build_generator(config)?),
        config.pipeline_settings(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // 1. Load config
    let mut config = Config::load(&cli.config)?;
    if let Command::Serve { bind: Some(bind) } = &cli.command {
        config.server.bind = bind.clone();
    }
    let config = Arc::new(config);
    tracing::info!(
        project = config.project.project_id.as_deref().unwrap_or("-"),
        dataset = %config.project.dataset,
        table = %config.project.table,
        embed_model = %config.embedding.model,
        llm_model = %config.llm.model,
        "Starting metarag"
    );

    match cli.command {
        Command::Serve { .. } => {
            let pipeline = build_pipeline(&config)?;
            serve(AppState { pipeline, config }).await?;
        }
        Command::Mcp => {
            let pipeline = build_pipeline(&config)?;
            McpServer::new(McpContext { pipeline, config }).start().await?;
        }
        Command::Ask {
            query,
            domain,
            record_type,
            k,
        } => {
            let pipeline = build_pipeline(&config)?;
            let query = Query::new(query)
                .with_domain(domain)
                .with_record_type(record_type);
            let result = pipeline
                .answer_or_sentinel(&query, config.resolve_k(k)?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Import { file } => {
            let store = open_store(&config)?;
            let written = import_file(&store, &file)?;
            println!("imported {written} records into {}", config.store.db_path);
        }
    }

    Ok(())
}
