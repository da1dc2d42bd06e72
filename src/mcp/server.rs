//! MCP Server - exposes the PR monitor tools to MCP clients
//!
//! Three tools, driven by the LLM in a loop:
//! - pr_monitor_start: baseline fetch and session creation
//! - pr_monitor_next_step: the one blocking call; returns a directive
//! - pr_monitor_stop: cancel and dispose
//!
//! Each tools/call runs in its own task so a `next_step` blocked in the
//! poll loop never wedges `stop` or a replacement call. While a call is
//! in flight a heartbeat notification goes out every heartbeat interval
//! so the client's transport does not time out.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::monitor::{api, registry, NextStepRequest, StartRequest};

use super::transport::{McpMessage, NullTransport, StdioTransport, Transport};
use super::types::*;

type ToolHandler =
    Arc<dyn Fn(Value, Arc<dyn Transport>) -> BoxFuture<'static, CallToolResult> + Send + Sync>;

struct RegisteredTool {
    tool: McpTool,
    handler: ToolHandler,
}

/// MCP server over a transport
pub struct McpServer {
    transport: Arc<dyn Transport>,
    tools: RwLock<HashMap<String, RegisteredTool>>,
    server_info: ServerInfo,
}

impl McpServer {
    /// Create a server over stdio
    pub fn new_stdio(config: Arc<Config>) -> Self {
        Self::new(Arc::new(StdioTransport::new()), config)
    }

    /// Create a server for in-process usage (tests, CLI introspection).
    /// Does not spawn stdio threads or lock stdout.
    pub fn new_local(config: Arc<Config>) -> Self {
        Self::new(Arc::new(NullTransport::new()), config)
    }

    pub fn new(transport: Arc<dyn Transport>, config: Arc<Config>) -> Self {
        Self {
            transport,
            tools: RwLock::new(monitor_tools(config)),
            server_info: ServerInfo {
                name: "pr-sentinel".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Tool definitions, for tools/list and tests
    pub async fn list_tools(&self) -> Vec<McpTool> {
        let mut tools: Vec<McpTool> = self
            .tools
            .read()
            .await
            .values()
            .map(|r| r.tool.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Invoke a tool directly (tests, CLI introspection)
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResult {
        let handler = {
            let tools = self.tools.read().await;
            tools.get(name).map(|r| Arc::clone(&r.handler))
        };
        match handler {
            Some(handler) => handler(arguments, Arc::clone(&self.transport)).await,
            None => CallToolResult::error(format!("unknown tool: {name}")),
        }
    }
}

/// The three monitor tools, keyed by name
fn monitor_tools(config: Arc<Config>) -> HashMap<String, RegisteredTool> {
    let mut tools = HashMap::new();

    let start_config = Arc::clone(&config);
    add_tool(
        &mut tools,
        "pr_monitor_start",
        "Start monitoring a pull request. Returns a summary and the monitor id; \
         call pr_monitor_next_step with event=\"ready\" afterwards.",
        json!({
            "type": "object",
            "properties": {
                "owner": {"type": "string", "description": "Repository owner"},
                "repo": {"type": "string", "description": "Repository name"},
                "pr_number": {"type": "integer", "description": "Pull request number"},
                "session_folder": {
                    "type": "string",
                    "description": "Directory for the session's log, trigger, and ignore files"
                }
            },
            "required": ["owner", "repo", "pr_number", "session_folder"]
        }),
        move |args, _transport| {
            let config = Arc::clone(&start_config);
            Box::pin(async move {
                let request = match parse_start_args(&args) {
                    Ok(request) => request,
                    Err(message) => return CallToolResult::error(message),
                };
                match api::start(config, request).await {
                    Ok(summary) => CallToolResult::json(&summary),
                    Err(err) => CallToolResult::error(format!("start failed: {err:#}")),
                }
            })
        },
    );

    add_tool(
        &mut tools,
        "pr_monitor_next_step",
        "Advance the monitor's decision loop. Blocks while polling; returns a \
         directive (ask_user, execute, polling, stop, merged) that must be followed.",
        json!({
            "type": "object",
            "properties": {
                "monitor_id": {"type": "string", "description": "Id returned by pr_monitor_start"},
                "event": {
                    "type": "string",
                    "description": "One of: ready, user_chose, comment_addressed, \
                         investigation_complete, push_completed, task_complete"
                },
                "choice": {"type": "string", "description": "The user's selection (with user_chose)"},
                "data": {
                    "type": "object",
                    "description": "Optional findings/suggested_fix/issue_type payload"
                }
            },
            "required": ["monitor_id", "event"]
        }),
        move |args, transport| {
            Box::pin(async move {
                let request = NextStepRequest {
                    monitor_id: args
                        .get("monitor_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    event: args
                        .get("event")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    choice: args
                        .get("choice")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    data: args.get("data").cloned(),
                };
                let heartbeat = heartbeat_emitter(transport);
                let directive = api::next_step(request, Some(heartbeat)).await;
                CallToolResult::json(&directive)
            })
        },
    );

    add_tool(
        &mut tools,
        "pr_monitor_stop",
        "Stop monitoring a pull request and dispose its session.",
        json!({
            "type": "object",
            "properties": {
                "monitor_id": {"type": "string", "description": "Id returned by pr_monitor_start"}
            },
            "required": ["monitor_id"]
        }),
        move |args, _transport| {
            Box::pin(async move {
                let monitor_id = args
                    .get("monitor_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let directive = api::stop(&monitor_id).await;
                CallToolResult::json(&directive)
            })
        },
    );

    tools
}

fn add_tool(
    tools: &mut HashMap<String, RegisteredTool>,
    name: &str,
    description: &str,
    input_schema: Value,
    handler: impl Fn(Value, Arc<dyn Transport>) -> BoxFuture<'static, CallToolResult>
        + Send
        + Sync
        + 'static,
) {
    tools.insert(
        name.to_string(),
        RegisteredTool {
            tool: McpTool {
                name: name.to_string(),
                description: Some(description.to_string()),
                input_schema,
            },
            handler: Arc::new(handler),
        },
    );
}

impl McpServer {
    /// Serve until the client closes the stream
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!("MCP server ready ({})", self.server_info.name);
        loop {
            let message = match self.transport.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => {
                    warn!("transport receive error: {err:#}");
                    continue;
                }
            };

            match message {
                McpMessage::Request(request) => self.dispatch_request(request).await,
                McpMessage::Notification(notification) => {
                    debug!("notification: {}", notification.method);
                }
            }
        }
        info!("client closed the stream; shutting down sessions");
        registry::shutdown_all().await;
        Ok(())
    }

    async fn dispatch_request(self: &Arc<Self>, request: JsonRpcRequest) {
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability { list_changed: false }),
                    },
                    server_info: self.server_info.clone(),
                    instructions: Some(
                        "Drive the PR monitor in a loop: pr_monitor_start once, then \
                         pr_monitor_next_step repeatedly, following each directive it \
                         returns. Never decide control flow yourself."
                            .to_string(),
                    ),
                };
                self.respond(id, serde_json::to_value(result).unwrap_or_default())
                    .await;
            }
            "ping" => {
                self.respond(id, json!({})).await;
            }
            "tools/list" => {
                let result = ListToolsResult {
                    tools: self.list_tools().await,
                };
                self.respond(id, serde_json::to_value(result).unwrap_or_default())
                    .await;
            }
            "tools/call" => {
                let params: CallToolParams = match request
                    .params
                    .clone()
                    .map(serde_json::from_value)
                    .transpose()
                {
                    Ok(Some(params)) => params,
                    Ok(None) => {
                        self.respond_error(id, JsonRpcError::invalid_params("missing params"))
                            .await;
                        return;
                    }
                    Err(err) => {
                        self.respond_error(id, JsonRpcError::invalid_params(err.to_string()))
                            .await;
                        return;
                    }
                };

                let handler = {
                    let tools = self.tools.read().await;
                    tools.get(&params.name).map(|r| Arc::clone(&r.handler))
                };
                let Some(handler) = handler else {
                    self.respond_error(id, JsonRpcError::method_not_found(&params.name))
                        .await;
                    return;
                };

                // Tool calls run in their own task: next_step can block for
                // hours while stop must still get through.
                let server = Arc::clone(self);
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    let result = handler(params.arguments, transport).await;
                    server
                        .respond(id, serde_json::to_value(result).unwrap_or_default())
                        .await;
                });
            }
            other => {
                self.respond_error(id, JsonRpcError::method_not_found(other))
                    .await;
            }
        }
    }

    async fn respond(&self, id: RequestId, result: Value) {
        let response = JsonRpcResponse::success(id, result);
        if let Err(err) = self.transport.send_response(response).await {
            warn!("failed to send response: {err:#}");
        }
    }

    async fn respond_error(&self, id: RequestId, error: JsonRpcError) {
        let response = JsonRpcResponse::error(id, error);
        if let Err(err) = self.transport.send_response(response).await {
            warn!("failed to send error response: {err:#}");
        }
    }
}

/// Heartbeat closure: each emit becomes a logging notification on the
/// transport, keeping the client's read timeout fed.
fn heartbeat_emitter(transport: Arc<dyn Transport>) -> Box<dyn Fn(String) + Send + Sync> {
    Box::new(move |message: String| {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            let notification = JsonRpcNotification::new(
                "notifications/message",
                Some(json!({ "level": "info", "data": message })),
            );
            let _ = transport.send_notification(notification).await;
        });
    })
}

fn parse_start_args(args: &Value) -> Result<StartRequest, String> {
    let owner = args
        .get("owner")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or("owner is required")?;
    let repo = args
        .get("repo")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or("repo is required")?;
    let pr_number = args
        .get("pr_number")
        .and_then(Value::as_u64)
        .ok_or("pr_number is required")?;
    let session_folder = args
        .get("session_folder")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or("session_folder is required")?;
    Ok(StartRequest {
        owner: owner.to_string(),
        repo: repo.to_string(),
        pr_number,
        session_folder: PathBuf::from(session_folder),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_args_require_every_field() {
        let full = json!({
            "owner": "octo", "repo": "widgets", "pr_number": 7,
            "session_folder": "/tmp/sessions"
        });
        let request = parse_start_args(&full).unwrap();
        assert_eq!(request.owner, "octo");
        assert_eq!(request.pr_number, 7);

        for missing in ["owner", "repo", "pr_number", "session_folder"] {
            let mut args = full.clone();
            args.as_object_mut().unwrap().remove(missing);
            assert!(parse_start_args(&args).is_err(), "{missing} should be required");
        }
    }
}
