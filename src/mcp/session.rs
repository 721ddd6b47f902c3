//! 会话抽象：一条到 MCP 服务器的活动连接
//!
//! McpSession 只暴露两项远程能力（列出工具、调用工具）与关闭；SessionConnector 负责
//! 按描述符建立会话（握手成功才算连接成功）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::mcp::protocol::{CallToolResult, Tool};
use crate::mcp::ServerDescriptor;

/// 单个会话的传输 / 协议错误（与业务失败标记区分）
#[derive(Error, Debug)]
pub enum McpError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Session closed")]
    Closed,

    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            McpError::Timeout(e.to_string())
        } else {
            McpError::Http(e.to_string())
        }
    }
}

/// 一条活动的 MCP 会话
#[async_trait]
pub trait McpSession: Send + Sync {
    /// 所属服务器名
    fn server_name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError>;

    /// 关闭连接；重复关闭应当无害
    async fn close(&self) -> Result<(), McpError>;
}

/// 根据描述符打开会话
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Arc<dyn McpSession>, McpError>;
}
