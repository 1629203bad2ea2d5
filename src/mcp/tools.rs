/// MCP tool handlers for metarag.
///
/// 1. ask_metadata – answer a question from the metadata catalog
/// 2. health       – liveness check, touches no upstream service
use crate::error::RagError;
use crate::mcp::server::McpContext;
use crate::models::{AnswerResult, AnswerStatus, Query, RecordType};
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct AskParams {
    /// Question about reports or metrics (natural language)
    query: String,
    /// Restrict to a business domain (e.g. 'sales', 'marketing')
    domain: Option<String>,
    /// Restrict to a record type: report | metric
    #[serde(rename = "type")]
    record_type: Option<RecordType>,
    /// Max matching records to retrieve (default from config)
    k: Option<i64>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

fn answer_json(result: &AnswerResult) -> serde_json::Value {
    let matches: Vec<serde_json::Value> = result
        .matches
        .iter()
        .map(|m| {
            serde_json::json!({
                "id": m.record.id,
                "page_content": m.record.page_content,
                "metadata": m.record.metadata,
                "score": m.score,
                "rank": m.rank,
            })
        })
        .collect();
    serde_json::json!({
        "answer": result.answer,
        "matches": matches,
        "num_matches": result.num_matches,
        "degraded": result.status == AnswerStatus::Unavailable,
    })
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Answer a question about analytics reports and metrics using the metadata catalog. Returns the answer plus the matching metadata records it was grounded on."
    )]
    async fn ask_metadata(&self, params: Parameters<AskParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().is_empty() {
            return error_result("query is required");
        }

        let k = match self.ctx.config.resolve_k(p.k) {
            Ok(k) => k,
            Err(e) => return error_result(&e.to_string()),
        };
        let query = Query::new(p.query)
            .with_domain(p.domain)
            .with_record_type(p.record_type);

        match self.ctx.pipeline.answer_or_sentinel(&query, k).await {
            Ok(result) => json_result(answer_json(&result)),
            Err(e @ RagError::InvalidInput(_)) => error_result(&e.to_string()),
            Err(e) => Err(McpError::internal_error(e.to_string(), None)),
        }
    }

    #[tool(description = "Liveness check. Does not contact any upstream service.")]
    async fn health(&self) -> Result<CallToolResult, McpError> {
        json_result(serde_json::json!({ "status": "ok" }))
    }
}
