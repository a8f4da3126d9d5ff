//! MCP (Model Context Protocol) server implementation
//!
//! Exposes the usage tracker as MCP tools over JSON-RPC 2.0. Requests are
//! read from stdin one per line and responses written to stdout one per
//! line, so logging must stay on stderr.
//!
//! # Available Tools
//!
//! - `track_usage` - Record usage for an API call made elsewhere
//! - `get_session_summary` - Current session against its token budget
//! - `get_user_summary` - Running total for one user
//! - `get_all_users_summary` - Every user's total plus grand totals
//! - `get_usage_history` - Most recent records for a user
//! - `compare_models` - Rank models by the cost of the same request
//! - `clear_user_data` - Delete one user's data
//! - `get_exchange_rate` - Current USD/KRW rate, optionally refreshed
//!
//! ```bash
//! tokmeter mcp
//! ```
//!
//! # Example Request
//!
//! ```json
//! {
//!   "jsonrpc": "2.0",
//!   "method": "tools/call",
//!   "params": {
//!     "name": "track_usage",
//!     "arguments": {"provider": "openai", "model": "gpt-4o", "inputTokens": 120, "outputTokens": 40}
//!   },
//!   "id": 1
//! }
//! ```

use crate::tracker::{SharedTracker, refresh_exchange_rate};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokmeter_core::error::Result;
use tokmeter_core::{Metadata, PartialUsage, Provider, SessionId, UserId};
use tokmeter_terminal::BudgetBar;
use tracing::{debug, error, info, warn};

/// JSON-RPC 2.0 version string
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision implemented here
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

const SERVER_NAME: &str = "tokmeter";

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(-32600, "Invalid request")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }
}

/// One tool advertised by `tools/list`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackUsageArgs {
    provider: Option<String>,
    model: Option<String>,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    total_tokens: Option<u64>,
    cost: Option<f64>,
    user_id: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserArgs {
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryArgs {
    user_id: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ModelRef {
    provider: String,
    model: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompareArgs {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    models: Vec<ModelRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearArgs {
    user_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExchangeRateArgs {
    #[serde(default)]
    refresh: bool,
}

fn parse_args<T: for<'de> Deserialize<'de>>(
    arguments: Value,
) -> std::result::Result<T, JsonRpcError> {
    // Tools without required fields accept a missing arguments object
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid arguments: {e}")))
}

fn parse_provider(name: &str) -> std::result::Result<Provider, JsonRpcError> {
    name.parse().map_err(JsonRpcError::invalid_params)
}

/// Tools advertised by `tools/list`
pub fn tool_definitions() -> Vec<McpTool> {
    let user_id = json!({"type": "string", "description": "User id, defaults to the configured user"});
    vec![
        McpTool {
            name: "track_usage",
            description: "Record the usage of an LLM API call",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "provider": {"type": "string", "enum": ["openai", "anthropic", "gemini"]},
                    "model": {"type": "string"},
                    "inputTokens": {"type": "integer", "minimum": 0},
                    "outputTokens": {"type": "integer", "minimum": 0},
                    "totalTokens": {"type": "integer", "minimum": 0},
                    "cost": {"type": "number", "minimum": 0, "description": "Pre-computed cost in USD"},
                    "userId": user_id,
                    "sessionId": {"type": "string"},
                    "metadata": {"type": "object"}
                },
                "required": ["inputTokens", "outputTokens"]
            }),
        },
        McpTool {
            name: "get_session_summary",
            description: "Usage of the current session against its token budget",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        McpTool {
            name: "get_user_summary",
            description: "Running usage total for one user",
            input_schema: json!({"type": "object", "properties": {"userId": user_id}}),
        },
        McpTool {
            name: "get_all_users_summary",
            description: "Usage totals for every user plus grand totals",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        McpTool {
            name: "get_usage_history",
            description: "Most recent usage records for a user, oldest first",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "userId": user_id,
                    "limit": {"type": "integer", "minimum": 1}
                }
            }),
        },
        McpTool {
            name: "compare_models",
            description: "Rank models by the USD cost of the same request",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "inputTokens": {"type": "integer", "minimum": 0},
                    "outputTokens": {"type": "integer", "minimum": 0},
                    "models": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "provider": {"type": "string"},
                                "model": {"type": "string"}
                            },
                            "required": ["provider", "model"]
                        }
                    }
                },
                "required": ["inputTokens", "outputTokens"]
            }),
        },
        McpTool {
            name: "clear_user_data",
            description: "Delete all usage data of one user",
            input_schema: json!({
                "type": "object",
                "properties": {"userId": {"type": "string"}},
                "required": ["userId"]
            }),
        },
        McpTool {
            name: "get_exchange_rate",
            description: "Current USD to KRW exchange rate",
            input_schema: json!({
                "type": "object",
                "properties": {"refresh": {"type": "boolean"}}
            }),
        },
    ]
}

/// MCP server backed by a shared usage tracker
pub struct McpServer {
    tracker: SharedTracker,
}

impl McpServer {
    pub fn new(tracker: SharedTracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &SharedTracker {
        &self.tracker
    }

    /// Handle one decoded JSON-RPC message
    ///
    /// Returns `None` for notifications, which get no response.
    pub async fn handle_message(&self, message: Value) -> Option<Value> {
        let Some(id) = message.get("id").cloned() else {
            let method = message.get("method").and_then(Value::as_str).unwrap_or("?");
            debug!("Ignoring notification {}", method);
            return None;
        };

        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return Some(error_response(id, JsonRpcError::invalid_request()));
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let response = match self.dispatch(method, params).await {
            Ok(result) => json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result}),
            Err(e) => {
                debug!("Request {} failed: {}", method, e.message);
                error_response(id, e)
            }
        };
        Some(response)
    }

    /// Handle one raw line; `None` for notifications
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(line) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                Some(error_response(Value::Null, JsonRpcError::parse_error()))
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Value) -> std::result::Result<Value, JsonRpcError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": SERVER_NAME, "version": crate::VERSION}
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({"tools": tool_definitions()})),
            "tools/call" => {
                let call: ToolCallParams = serde_json::from_value(params)
                    .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tool call params: {e}")))?;
                let value = self.call_tool(&call.name, call.arguments).await?;
                let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                Ok(json!({"content": [{"type": "text", "text": text}]}))
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    /// Run one tool and return its structured result
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> std::result::Result<Value, JsonRpcError> {
        match name {
            "track_usage" => {
                let args: TrackUsageArgs = parse_args(arguments)?;
                let mut usage = PartialUsage::new(args.input_tokens, args.output_tokens);
                if let Some(provider) = &args.provider {
                    usage = usage.with_provider(parse_provider(provider)?);
                }
                if let Some(model) = args.model {
                    usage = usage.with_model(model);
                }
                if let Some(total) = args.total_tokens {
                    usage = usage.with_total(total);
                }
                if let Some(cost) = args.cost {
                    if !cost.is_finite() || cost < 0.0 {
                        return Err(JsonRpcError::invalid_params("cost must be a non-negative number"));
                    }
                    usage = usage.with_cost(cost);
                }
                usage.metadata = args.metadata;

                let mut tracker = self.tracker.lock().await;
                let record = tracker
                    .track(
                        args.user_id.map(UserId::new),
                        args.session_id.map(SessionId::new),
                        usage,
                    )
                    .map_err(|e| JsonRpcError::new(-32603, e.to_string()))?;
                Ok(json!({
                    "record": record,
                    "userTotal": tracker.user_summary(Some(&record.user_id)),
                }))
            }
            "get_session_summary" => {
                let summary = self.tracker.lock().await.session_summary();
                let progress_bar = BudgetBar::default().render_plain(summary.percent_used);
                let mut result = json!(summary);
                result["progressBar"] = json!(progress_bar);
                Ok(result)
            }
            "get_user_summary" => {
                let args: UserArgs = parse_args(arguments)?;
                let user = args.user_id.map(UserId::new);
                let tracker = self.tracker.lock().await;
                let user_id = user.clone().unwrap_or_else(|| tracker.config().user_id.clone());
                Ok(json!({
                    "userId": user_id,
                    "summary": tracker.user_summary(user.as_ref()),
                }))
            }
            "get_all_users_summary" => {
                let (users, totals) = self.tracker.lock().await.all_users_summary();
                Ok(json!({"users": users, "totals": totals}))
            }
            "get_usage_history" => {
                let args: HistoryArgs = parse_args(arguments)?;
                if args.limit == Some(0) {
                    return Err(JsonRpcError::invalid_params("limit must be at least 1"));
                }
                let user = args.user_id.map(UserId::new);
                let tracker = self.tracker.lock().await;
                let records = tracker.usage_history(user.as_ref(), args.limit);
                Ok(json!({"count": records.len(), "records": records}))
            }
            "compare_models" => {
                let args: CompareArgs = parse_args(arguments)?;
                let models = args
                    .models
                    .iter()
                    .map(|m| -> std::result::Result<(Provider, &str), JsonRpcError> {
                        Ok((parse_provider(&m.provider)?, m.model.as_str()))
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let ranking = self.tracker.lock().await.compare_models(
                    args.input_tokens,
                    args.output_tokens,
                    &models,
                );
                Ok(json!({"comparisons": ranking}))
            }
            "clear_user_data" => {
                let args: ClearArgs = parse_args(arguments)?;
                if args.user_id.trim().is_empty() {
                    return Err(JsonRpcError::invalid_params("userId must not be empty"));
                }
                let user_id = UserId::new(args.user_id);
                let cleared = self.tracker.lock().await.clear_user_data(&user_id);
                Ok(json!({"userId": user_id, "cleared": cleared}))
            }
            "get_exchange_rate" => {
                let args: ExchangeRateArgs = parse_args(arguments)?;
                let rate = if args.refresh {
                    refresh_exchange_rate(&self.tracker, true).await
                } else {
                    self.tracker.lock().await.exchange_rate().clone()
                };
                Ok(json!(rate))
            }
            other => Err(JsonRpcError::invalid_params(format!("Unknown tool: {other}"))),
        }
    }

    /// Serve requests from stdin until it closes
    pub async fn run_stdio(self) -> Result<()> {
        info!("Starting MCP server on stdio");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read from stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            debug!("Received request: {}", line);

            if let Some(response) = self.handle_line(&line).await {
                let response_str = serde_json::to_string(&response)?;
                stdout.write_all(response_str.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;

                debug!("Sent response: {}", response_str);
            }
        }

        info!("MCP stdio server shutting down");
        Ok(())
    }
}

fn error_response(id: Value, error: JsonRpcError) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "error": error})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::UsageTracker;
    use tokmeter_core::TrackerConfig;

    fn server() -> McpServer {
        let tracker = UsageTracker::new(TrackerConfig::default().in_memory().with_user_id("alice"))
            .unwrap()
            .into_shared();
        McpServer::new(tracker)
    }

    fn call(name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        })
    }

    fn tool_result(response: &Value) -> Value {
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_ping() {
        let server = server();
        let response = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
            .await
            .unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["serverInfo"]["name"], "tokmeter");

        let pong = server
            .handle_message(json!({"jsonrpc": "2.0", "id": "p", "method": "ping"}))
            .await
            .unwrap();
        assert_eq!(pong["result"], json!({}));
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let server = server();
        let response = server
            .handle_message(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        assert!(response.is_none());

        let response = server.handle_message(json!({"jsonrpc": "2.0"})).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_session_summary_includes_progress_bar() {
        let tracker = UsageTracker::new(
            TrackerConfig::default()
                .in_memory()
                .with_user_id("alice")
                .with_session_id("s-1")
                .with_session_budget(1000),
        )
        .unwrap()
        .into_shared();
        let server = McpServer::new(tracker);

        let empty = tool_result(&server.handle_message(call("get_session_summary", Value::Null)).await.unwrap());
        assert_eq!(empty["percentUsed"], 0.0);
        assert_eq!(empty["progressBar"], format!("[{}]", ".".repeat(30)));

        server
            .handle_message(call(
                "track_usage",
                json!({"inputTokens": 400, "outputTokens": 100, "sessionId": "s-1"}),
            ))
            .await
            .unwrap();

        let summary = tool_result(&server.handle_message(call("get_session_summary", Value::Null)).await.unwrap());
        assert_eq!(summary["usedTokens"], 500);
        assert_eq!(summary["percentUsed"], 50.0);
        let bar = summary["progressBar"].as_str().unwrap();
        assert_eq!(bar, format!("[{}{}]", "#".repeat(15), ".".repeat(15)));
        assert!(!bar.contains('\u{1b}'));
    }

    #[tokio::test]
    async fn test_huge_usage_saturates_instead_of_panicking() {
        let server = server();
        for _ in 0..2 {
            let response = server
                .handle_message(call(
                    "track_usage",
                    json!({"inputTokens": u64::MAX, "outputTokens": 0}),
                ))
                .await
                .unwrap();
            assert!(response.get("error").is_none());
        }

        let tracker = server.tracker().lock().await;
        let total = tracker.user_summary(None).unwrap();
        assert_eq!(total.total_tokens, u64::MAX);
        assert_eq!(total.request_count, 2);
        assert_eq!(tracker.usage_history(None, None).len(), 2);
    }

    #[tokio::test]
    async fn test_tools_list_has_every_tool() {
        let response = server()
            .handle_message(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await
            .unwrap();
        let names: Vec<&str> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"track_usage"));
        assert!(names.contains(&"get_exchange_rate"));
        assert!(response["result"]["tools"][0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn test_track_usage_then_summary() {
        let server = server();
        let response = server
            .handle_message(call(
                "track_usage",
                json!({"provider": "anthropic", "model": "claude-3-haiku", "inputTokens": 100, "outputTokens": 50}),
            ))
            .await
            .unwrap();
        let result = tool_result(&response);
        assert_eq!(result["record"]["totalTokens"], 150);
        assert_eq!(result["userTotal"]["requestCount"], 1);

        let summary = tool_result(&server.handle_message(call("get_user_summary", Value::Null)).await.unwrap());
        assert_eq!(summary["userId"], "alice");
        assert_eq!(summary["summary"]["totalTokens"], 150);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let server = server();
        let response = server
            .handle_message(call("track_usage", json!({"inputTokens": -5, "outputTokens": 1})))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32602);

        let response = server
            .handle_message(call("track_usage", json!({"provider": "mistral", "inputTokens": 1, "outputTokens": 1})))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32602);

        let response = server
            .handle_message(call("clear_user_data", json!({})))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_unknown_method_and_parse_error() {
        let server = server();
        let response = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32601);

        let response = server.handle_line("{not json").await.unwrap();
        assert_eq!(response["error"]["code"], -32700);
        assert!(response["id"].is_null());
    }

    #[tokio::test]
    async fn test_compare_models_tool() {
        let result = tool_result(
            &server()
                .handle_message(call(
                    "compare_models",
                    json!({
                        "inputTokens": 500,
                        "outputTokens": 500,
                        "models": [
                            {"provider": "openai", "model": "gpt-4o"},
                            {"provider": "google", "model": "gemini-1.5-flash"}
                        ]
                    }),
                ))
                .await
                .unwrap(),
        );
        let rows = result["comparisons"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["model"], "gemini-1.5-flash");
        assert_eq!(rows[0]["rank"], 1);
    }
}
