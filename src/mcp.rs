//! MCP tool surface.
//!
//! Exposes `search`, `get_file`, and `status` as MCP tools over the stdio
//! transport, for Cursor, Claude, and other MCP clients. Every session
//! shares the same [`ServiceContainer`] (all state is behind `Arc`), so
//! tool calls run concurrently with the watcher.
//!
//! Tool-level problems (bad arguments, traversal attempts, no results)
//! come back as tool results, not protocol errors — the assistant sees the
//! message and can react to it.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};

use crate::files;
use crate::service::ServiceContainer;
use crate::status;

/// Default number of results returned by `search`.
const DEFAULT_TOP_K: usize = 5;
/// Bounds applied to the caller's `topK`.
const TOP_K_RANGE: (usize, usize) = (1, 10);

#[derive(Clone)]
pub struct MemoryExchangeServer {
    container: Arc<ServiceContainer>,
}

impl MemoryExchangeServer {
    pub fn new(container: Arc<ServiceContainer>) -> Self {
        Self { container }
    }

    fn tool_descriptors() -> Vec<Tool> {
        vec![
            make_tool(
                "search",
                "Search the knowledge base with hybrid keyword + semantic retrieval. \
                 Pass currentFilePath to boost entries from domains relevant to the \
                 file you are working on.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What to look for"
                        },
                        "currentFilePath": {
                            "type": "string",
                            "description": "Path of the code file currently being edited"
                        },
                        "topK": {
                            "type": "integer",
                            "description": "Number of results (1-10, default 5)"
                        }
                    },
                    "required": ["query"]
                }),
            ),
            make_tool(
                "get_file",
                "Read a knowledge file by its path relative to the source root.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "filePath": {
                            "type": "string",
                            "description": "Relative path of the Markdown file"
                        }
                    },
                    "required": ["filePath"]
                }),
            ),
            make_tool(
                "status",
                "Report index health: chunk and file counts plus the last indexed time.",
                serde_json::json!({ "type": "object", "properties": {} }),
            ),
        ]
    }

    async fn handle_search(&self, args: &serde_json::Value) -> CallToolResult {
        let query = match args.get("query").and_then(|q| q.as_str()) {
            Some(q) if !q.trim().is_empty() => q,
            _ => return CallToolResult::error(vec![Content::text("query is required")]),
        };
        let current_file_path = args.get("currentFilePath").and_then(|p| p.as_str());
        let top_k = args
            .get("topK")
            .and_then(|k| k.as_i64())
            .map(|k| (k.max(TOP_K_RANGE.0 as i64) as usize).min(TOP_K_RANGE.1))
            .unwrap_or(DEFAULT_TOP_K);

        match self
            .container
            .orchestrator
            .search(query, current_file_path, top_k)
            .await
        {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => CallToolResult::error(vec![Content::text(format!("search failed: {}", e))]),
        }
    }

    fn handle_get_file(&self, args: &serde_json::Value) -> CallToolResult {
        let file_path = match args.get("filePath").and_then(|p| p.as_str()) {
            Some(p) => p,
            None => return CallToolResult::error(vec![Content::text("filePath is required")]),
        };

        let root = match self.container.config.require_source_path() {
            Ok(root) => root,
            Err(e) => return CallToolResult::error(vec![Content::text(e.to_string())]),
        };

        match files::read_relative(root, file_path) {
            Ok(content) => CallToolResult::success(vec![Content::text(content)]),
            Err(message) => CallToolResult::error(vec![Content::text(message)]),
        }
    }

    async fn handle_status(&self) -> CallToolResult {
        let config = &self.container.config;
        let text = status::report(
            self.container.read_index.as_ref(),
            config.source_path.as_deref(),
            &config.provider,
            &config.index_name,
        )
        .await;
        CallToolResult::success(vec![Content::text(text)])
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        Self::tool_descriptors()
            .into_iter()
            .find(|t| t.name == name)
    }
}

fn make_tool(name: &'static str, description: &'static str, schema: serde_json::Value) -> Tool {
    let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match schema {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    };

    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema,
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(true)),
        icons: None,
    }
}

impl ServerHandler for MemoryExchangeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "memory-exchange".to_string(),
                title: Some("Memory Exchange".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Memory Exchange — hybrid search over a Markdown knowledge base. \
                 Use search to find relevant entries (pass currentFilePath for \
                 domain-aware ranking), get_file to read a specific knowledge file, \
                 and status to check index health."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(
            Self::tool_descriptors(),
        )))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

        match request.name.as_ref() {
            "search" => Ok(self.handle_search(&args).await),
            "get_file" => Ok(self.handle_get_file(&args)),
            "status" => Ok(self.handle_status().await),
            other => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", other),
                None,
            )),
        }
    }
}

/// Serve the tool surface over stdio until the client disconnects.
pub async fn serve_stdio(container: Arc<ServiceContainer>) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = MemoryExchangeServer::new(container);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
