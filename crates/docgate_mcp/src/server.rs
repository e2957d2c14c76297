//! Gate Server Implementation
//!
//! JSON-RPC 2.0 server over stdio. Every `tools/call` is evaluated by the
//! `Gate`; only admitted calls reach the tool handler.
//!
//! # Example
//!
//! ```ignore
//! let gate = Arc::new(Gate::builder(config).handler(handler).build()?);
//! let mut server = GateServer::new(GateServerConfig::default(), gate);
//! server.run()?; // Blocking, no async runtime required
//! ```

use crate::protocol::{
    methods, ContentBlock, ErrorCode, Incoming, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ServerCapabilities, ServerInfo, SyncProtocol, ToolCallParams,
    ToolCallResult, ToolDefinition, ToolsCapability, ToolsListResult, JSONRPC_VERSION,
    MCP_PROTOCOL_VERSION, NOT_INITIALIZED,
};
use crate::schema::input_schema;
use anyhow::{Context, Result};
use docgate_core::{Gate, GateOutcome, ToolCall};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Server configuration
#[derive(Debug, Clone)]
pub struct GateServerConfig {
    /// Server name (reported in initialize)
    pub server_name: String,

    /// Server version (reported in initialize)
    pub server_version: String,
}

impl Default for GateServerConfig {
    fn default() -> Self {
        Self {
            server_name: "docgate".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// JSON-RPC front end for a `Gate`
pub struct GateServer {
    config: GateServerConfig,
    gate: Arc<Gate>,
    /// Caller identity for calls that do not carry `callerId`
    session_id: String,
    initialized: bool,
}

impl GateServer {
    pub fn new(config: GateServerConfig, gate: Arc<Gate>) -> Self {
        Self {
            config,
            gate,
            session_id: Uuid::new_v4().to_string(),
            initialized: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run the server on stdin/stdout (blocking)
    pub fn run(&mut self) -> Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.serve(stdin.lock(), stdout.lock())
    }

    /// Serve requests from `reader` until EOF
    pub fn serve<R: BufRead, W: Write>(&mut self, reader: R, writer: W) -> Result<()> {
        let mut protocol = SyncProtocol::new(reader, writer);
        info!("Gate server starting (session {})", self.session_id);

        while let Some(incoming) = protocol
            .read_message()
            .context("Failed to read request")?
        {
            let response = match incoming {
                Incoming::Request(request) => self.handle_request(request),
                Incoming::Malformed(e) => Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::new(ErrorCode::ParseError, format!("Invalid JSON: {}", e)),
                )),
            };

            // Notifications get no response
            if let Some(response) = response {
                protocol
                    .write_response(&response)
                    .context("Failed to write response")?;
            }
        }

        info!("Gate server shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC request; `None` for notifications
    pub fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("Request: method={} id={:?}", request.method, request.id);

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    ErrorCode::InvalidRequest,
                    format!("Invalid JSON-RPC version: {}", request.jsonrpc),
                ),
            ));
        }

        if request.id.is_none() {
            if request.method != methods::INITIALIZED {
                debug!("Ignoring notification {}", request.method);
            }
            return None;
        }

        let response = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request),
            methods::INITIALIZED => JsonRpcResponse::success(request.id, Value::Null),
            methods::PING => JsonRpcResponse::success(request.id, json!({})),
            methods::TOOLS_LIST => self.handle_tools_list(request),
            methods::TOOLS_CALL => self.handle_tools_call(request),
            _ => JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    ErrorCode::MethodNotFound,
                    format!("Unknown method: {}", request.method),
                ),
            ),
        };
        Some(response)
    }

    fn handle_initialize(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = match request.params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(
                            ErrorCode::InvalidParams,
                            format!("Invalid initialize params: {}", e),
                        ),
                    );
                }
            },
            None => InitializeParams::default(),
        };

        match &params.client_info {
            Some(client) => info!(
                "Initialize from {} v{} (protocol {})",
                client.name,
                client.version,
                params.protocol_version.as_deref().unwrap_or("unspecified")
            ),
            None => info!("Initialize from unnamed client"),
        }

        self.initialized = true;

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
        };
        success(request.id, &result)
    }

    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let categories = self.gate.path_guard().categories();
        let tools = self
            .gate
            .tools()
            .iter()
            .map(|(name, schema)| ToolDefinition {
                name: name.clone(),
                description: schema.description.clone(),
                input_schema: input_schema(schema, categories),
            })
            .collect();

        success(request.id, &ToolsListResult { tools })
    }

    fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if !self.initialized {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(NOT_INITIALIZED, "Server not initialized"),
            );
        }

        let params: ToolCallParams = match request.params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        ErrorCode::InvalidParams,
                        format!("Invalid tool call params: {}", e),
                    ),
                );
            }
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(ErrorCode::InvalidParams, "Missing tool call params"),
                );
            }
        };

        let call = ToolCall {
            tool: params.name,
            caller_id: params
                .caller_id
                .unwrap_or_else(|| self.session_id.clone()),
            arguments: params.arguments,
        };

        let result = match self.gate.evaluate(&call) {
            GateOutcome::Forwarded(Ok(value)) => tool_result(&value, false),
            GateOutcome::Forwarded(Err(e)) => {
                error!("Tool {} failed: {:#}", call.tool, e);
                tool_result(&json!({ "error": format!("{:#}", e) }), true)
            }
            GateOutcome::Denied(denial) => tool_result(&denial, true),
        };
        success(request.id, &result)
    }
}

fn tool_result<T: Serialize>(value: &T, is_error: bool) -> ToolCallResult {
    let text = serde_json::to_string(value)
        .unwrap_or_else(|e| json!({ "error": format!("Serialization failed: {}", e) }).to_string());
    ToolCallResult {
        content: vec![ContentBlock::text(text)],
        is_error,
    }
}

fn success<T: Serialize>(id: Option<crate::protocol::RequestId>, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            JsonRpcResponse::error(
                id,
                JsonRpcError::new(ErrorCode::InternalError, "Failed to serialize response"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgate_core::GateConfig;
    use tempfile::TempDir;

    fn server(temp: &TempDir) -> GateServer {
        let gate = Gate::builder(GateConfig::new(temp.path())).build().unwrap();
        GateServer::new(GateServerConfig::default(), Arc::new(gate))
    }

    #[test]
    fn test_config_default() {
        let config = GateServerConfig::default();
        assert_eq!(config.server_name, "docgate");
        assert!(!config.server_version.is_empty());
    }

    #[test]
    fn test_notifications_get_no_response() {
        let temp = TempDir::new().unwrap();
        let mut server = server(&temp);
        assert!(server
            .handle_request(JsonRpcRequest::notification(methods::INITIALIZED))
            .is_none());
    }

    #[test]
    fn test_tools_call_requires_initialize() {
        let temp = TempDir::new().unwrap();
        let mut server = server(&temp);
        let response = server
            .handle_request(JsonRpcRequest::new(
                1,
                methods::TOOLS_CALL,
                Some(json!({ "name": "anything" })),
            ))
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32002);
    }

    #[test]
    fn test_unknown_method() {
        let temp = TempDir::new().unwrap();
        let mut server = server(&temp);
        let response = server
            .handle_request(JsonRpcRequest::new("x", "resources/list", None))
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let temp = TempDir::new().unwrap();
        assert_ne!(server(&temp).session_id(), server(&temp).session_id());
    }
}
