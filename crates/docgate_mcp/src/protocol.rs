//! JSON-RPC 2.0 protocol types
//!
//! Line-delimited JSON-RPC over any `BufRead`/`Write` pair (stdio in
//! production, in-memory buffers in tests).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};
use thiserror::Error;
use tracing::trace;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names handled by the server
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// =============================================================================
// JSON-RPC Types
// =============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,

    /// Request ID (absent for notifications)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params: None,
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    /// Null when the request id could not be determined
    pub id: Option<RequestId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Standard JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Implementation-defined server error (-32000 to -32099)
    ServerError(i32),
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError(code) => code,
        }
    }
}

/// Returned for `tools/call` before `initialize`
pub const NOT_INITIALIZED: ErrorCode = ErrorCode::ServerError(-32002);

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// Request ID (string or number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

// =============================================================================
// MCP-Specific Types
// =============================================================================

/// initialize params; clients vary, so every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,

    #[serde(default)]
    pub capabilities: Value,

    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Tool definition for tools/list response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDefinition>,
}

/// tools/call params
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallParams {
    pub name: String,

    #[serde(default)]
    pub arguments: Value,

    /// Caller identity; the session id is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
}

/// tools/call result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ContentBlock>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            ContentBlock::Text { text } => text,
        }
    }
}

// =============================================================================
// Line transport
// =============================================================================

/// One inbound line: a request, or the raw text that failed to parse
#[derive(Debug)]
pub enum Incoming {
    Request(JsonRpcRequest),
    Malformed(String),
}

/// Longest accepted request line, newline included
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Line-delimited JSON-RPC over a reader/writer pair
pub struct SyncProtocol<R: BufRead, W: Write> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> SyncProtocol<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Read the next non-empty line; `None` on EOF
    ///
    /// Lines that are not UTF-8 or exceed `MAX_LINE_BYTES` come back as
    /// `Incoming::Malformed`; the stream stays usable.
    pub fn read_message(&mut self) -> Result<Option<Incoming>, ProtocolError> {
        loop {
            let mut line = Vec::new();
            let (consumed, overflow) = self.read_line_bounded(&mut line)?;
            if consumed == 0 {
                return Ok(None);
            }
            if overflow {
                return Ok(Some(Incoming::Malformed(format!(
                    "line exceeds {} bytes",
                    MAX_LINE_BYTES
                ))));
            }
            let text = match std::str::from_utf8(&line) {
                Ok(text) => text,
                Err(e) => return Ok(Some(Incoming::Malformed(format!("invalid UTF-8: {}", e)))),
            };
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            trace!("Received: {}", trimmed);
            return Ok(Some(match serde_json::from_str(trimmed) {
                Ok(request) => Incoming::Request(request),
                Err(e) => Incoming::Malformed(e.to_string()),
            }));
        }
    }

    /// Read through the next newline, keeping at most `MAX_LINE_BYTES`
    ///
    /// Returns the bytes consumed from the reader and whether the line was cut.
    fn read_line_bounded(&mut self, line: &mut Vec<u8>) -> Result<(usize, bool), ProtocolError> {
        let mut consumed = 0;
        let mut overflow = false;
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if available.is_empty() {
                return Ok((consumed, overflow));
            }

            let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..=i], true),
                None => (available, false),
            };
            if !overflow {
                if line.len() + chunk.len() > MAX_LINE_BYTES {
                    overflow = true;
                    line.clear();
                } else {
                    line.extend_from_slice(chunk);
                }
            }

            let len = chunk.len();
            self.reader.consume(len);
            consumed += len;
            if done {
                return Ok((consumed, overflow));
            }
        }
    }

    pub fn write_response(&mut self, response: &JsonRpcResponse) -> Result<(), ProtocolError> {
        let json = serde_json::to_string(response)?;
        trace!("Sending: {}", json);
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_response_error_has_null_id() {
        let response = JsonRpcResponse::error(None, JsonRpcError::new(ErrorCode::ParseError, "bad"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["error"]["code"], -32700);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_sync_protocol_reads_requests_and_malformed_lines() {
        let input = "\n{\"jsonrpc\":\"2.0\",\"id\":42,\"method\":\"ping\"}\nnot json\n";
        let mut protocol = SyncProtocol::new(Cursor::new(input.as_bytes().to_vec()), Vec::new());

        match protocol.read_message().unwrap() {
            Some(Incoming::Request(request)) => {
                assert_eq!(request.method, "ping");
                assert_eq!(request.id, Some(RequestId::Number(42)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            protocol.read_message().unwrap(),
            Some(Incoming::Malformed(_))
        ));
        assert!(protocol.read_message().unwrap().is_none());
    }

    #[test]
    fn test_sync_protocol_survives_invalid_utf8_and_long_lines() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_LINE_BYTES + 10));
        input.extend_from_slice(b"\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n");
        let mut protocol = SyncProtocol::new(Cursor::new(input), Vec::new());

        match protocol.read_message().unwrap() {
            Some(Incoming::Malformed(msg)) => assert!(msg.contains("UTF-8")),
            other => panic!("unexpected {:?}", other),
        }
        match protocol.read_message().unwrap() {
            Some(Incoming::Malformed(msg)) => assert!(msg.contains("exceeds")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            protocol.read_message().unwrap(),
            Some(Incoming::Request(_))
        ));
        assert!(protocol.read_message().unwrap().is_none());
    }

    #[test]
    fn test_tool_call_params_accept_caller_id() {
        let params: ToolCallParams = serde_json::from_value(json!({
            "name": "read_document",
            "arguments": {"id": "doc_abc123def456"},
            "callerId": "client-7"
        }))
        .unwrap();
        assert_eq!(params.caller_id.as_deref(), Some("client-7"));
        assert_eq!(params.arguments["id"], "doc_abc123def456");
    }

    #[test]
    fn test_tool_call_result_omits_false_is_error() {
        let ok = ToolCallResult {
            content: vec![ContentBlock::text("{}")],
            is_error: false,
        };
        let json = serde_json::to_value(ok).unwrap();
        assert!(json.get("isError").is_none());
        assert_eq!(json["content"][0]["type"], "text");
    }

    #[test]
    fn test_initialize_params_tolerate_missing_fields() {
        let params: InitializeParams = serde_json::from_value(json!({})).unwrap();
        assert!(params.client_info.is_none());
    }
}
