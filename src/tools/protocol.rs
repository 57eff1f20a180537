//! JSON-RPC 2.0 messages exchanged with tool adapters.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{ToolError, ToolResult};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn call(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    /// Numeric id, if the message answers one of our requests.
    pub fn request_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    pub fn into_result(self) -> ToolResult<Value> {
        if let Some(error) = self.error {
            return Err(ToolError::Server {
                code: error.code,
                message: error.message,
            });
        }

        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// A callable action advertised by an adapter via `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

pub fn parse_tool_list(result: Value) -> ToolResult<Vec<ToolDescriptor>> {
    #[derive(Deserialize)]
    struct ToolsResult {
        #[serde(default)]
        tools: Vec<ToolDescriptor>,
    }

    serde_json::from_value::<ToolsResult>(result)
        .map(|parsed| parsed.tools)
        .map_err(|err| ToolError::Protocol(format!("invalid tools/list result: {err}")))
}

/// Collapse a `tools/call` result into plain text for the calling agent.
pub fn flatten_call_result(result: Value) -> ToolResult<String> {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let text = match result.get("content").and_then(Value::as_array) {
        Some(blocks) => blocks
            .iter()
            .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => block.get("text").and_then(Value::as_str).map(str::to_string),
                Some(other) => Some(format!("[{other} content omitted]")),
                None => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    };

    if is_error {
        return Err(ToolError::Server {
            code: -1,
            message: text,
        });
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_omit_the_id() {
        let line = serde_json::to_string(&JsonRpcRequest::notification(
            "notifications/initialized",
            None,
        ))
        .expect("serialize");
        assert_eq!(
            line,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
        );
    }

    #[test]
    fn server_errors_surface_code_and_message() {
        let response: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"no such method"}}"#,
        )
        .expect("parse");
        assert_eq!(response.request_id(), Some(7));

        match response.into_result() {
            Err(ToolError::Server { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "no such method");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn tool_list_defaults_missing_schema() {
        let tools = parse_tool_list(json!({"tools": [{"name": "describe_table"}]})).expect("parse");
        assert_eq!(tools[0].name, "describe_table");
        assert_eq!(tools[0].input_schema["type"], "object");
    }

    #[test]
    fn call_results_join_text_blocks() {
        let text = flatten_call_result(json!({
            "content": [
                {"type": "text", "text": "rows: 4"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "cols: 3"}
            ]
        }))
        .expect("flatten");
        assert_eq!(text, "rows: 4\n[image content omitted]\ncols: 3");
    }

    #[test]
    fn flagged_call_results_become_errors() {
        let err = flatten_call_result(json!({
            "isError": true,
            "content": [{"type": "text", "text": "file not found"}]
        }))
        .expect_err("flagged result");
        assert!(err.to_string().contains("file not found"));
    }
}
