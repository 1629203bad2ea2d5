//! # metarag — Analytics Metadata RAG Search
//!
//! Answers natural-language questions about analytics reports and metrics,
//! grounded in the top-matching records of a metadata embedding index.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading (JSON + `.env` + environment) and validation
//! - **[`embedder`]** — Query embedding (OpenAI-compatible HTTP, offline mock)
//! - **[`store`]** — Vector store trait, SQLite + sqlite-vec and in-memory backends
//! - **[`context`]** — Budgeted context assembly from ranked matches
//! - **[`generator`]** — Prompt construction and language-model providers
//! - **[`pipeline`]** — The embed → search → assemble → generate orchestrator
//! - **[`server`]** — HTTP surface (`/`, `/health`, `/ask`)
//! - **[`mcp`]** — MCP server exposing the same query over stdio
//! - **[`import`]** — Loading pre-embedded records into the SQLite store

pub mod config;
pub mod context;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod import;
pub mod mcp;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod store;
