//! MCP 线上格式
//!
//! 工具描述与调用结果直接使用 rmcp 的模型类型。旧版 HTTP+SSE 传输不在 rmcp 客户端之内，
//! 它所需的 JSON-RPC 2.0 信封与 initialize 参数在这里定义。

use std::sync::Arc;

use rmcp::model::{JsonObject, RawContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::McpError;

pub use rmcp::model::{CallToolResult, Content, ListToolsResult, Tool};

pub const JSONRPC_VERSION: &str = "2.0";
/// 旧版 SSE 服务器使用的协议版本
pub const SSE_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 请求；id 为 None 时即通知
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
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 响应
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// 数值型 id（服务器可能回传字符串形式的数字）
    pub fn numeric_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result
            .ok_or_else(|| McpError::Protocol("response carries neither result nor error".into()))
    }
}

/// 旧版 SSE 会话的 initialize 请求参数
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": SSE_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// 由 JSON Schema 值构建工具描述；非对象的 schema 按空对象处理
pub fn tool(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Tool {
    let schema = match input_schema {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    };
    Tool::new(name.into(), description.into(), Arc::new(schema))
}

/// 只含一个文本片段的成功结果
pub fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

/// CallToolResult 的文本视图
pub trait ToolResultText {
    /// 按顺序拼接全部文本片段，非文本片段忽略
    fn joined_text(&self) -> String;

    /// 结果中的 isError 标志（缺省为 false）
    fn flagged_error(&self) -> bool;
}

impl ToolResultText for CallToolResult {
    fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match &c.raw {
                RawContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn flagged_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}
