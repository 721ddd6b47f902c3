//! 服务器描述符：从 MCP 配置文件（mcp_config.json）加载
//!
//! 文件格式：`{"mcpServers": {"<name>": {"url": "...", "transport": "sse", "enabled": true}}}`。
//! 文件不存在时写入指向本地开发端点的单条默认配置。

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mcp::McpError;

/// 默认配置中的服务器名与地址
pub const DEFAULT_SERVER_NAME: &str = "claims-server";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000/sse";

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// 旧版 HTTP+SSE：GET 事件流 + endpoint 事件 + POST 消息
    Sse,
    /// Streamable HTTP：单一端点 POST，响应为 JSON 或 SSE
    StreamableHttp,
    /// 未识别的传输方式，连接时跳过
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable_http",
            TransportKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

fn default_transport() -> TransportKind {
    TransportKind::Sse
}

fn default_enabled() -> bool {
    true
}

/// 配置文件中单个服务器条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub url: String,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 鉴权头的值；未设置时回退到环境变量 MCP_SERVER_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
}

/// 配置文件根
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfigFile {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, ServerEntry>,
}

impl McpConfigFile {
    pub fn with_default_server() -> Self {
        let mut mcp_servers = BTreeMap::new();
        mcp_servers.insert(
            DEFAULT_SERVER_NAME.to_string(),
            ServerEntry {
                url: DEFAULT_SERVER_URL.to_string(),
                transport: TransportKind::Sse,
                enabled: true,
                auth_header: None,
            },
        );
        Self { mcp_servers }
    }

    pub fn into_descriptors(self) -> Vec<ServerDescriptor> {
        self.mcp_servers
            .into_iter()
            .map(|(name, e)| ServerDescriptor {
                name,
                url: e.url,
                transport: e.transport,
                enabled: e.enabled,
                auth_header: e.auth_header,
            })
            .collect()
    }
}

/// 一个后端服务器的不可变描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub url: String,
    pub transport: TransportKind,
    pub enabled: bool,
    pub auth_header: Option<String>,
}

impl ServerDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            transport,
            enabled: true,
            auth_header: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 读取服务器描述符；文件不存在时创建默认配置再返回
pub fn load_server_descriptors(path: &Path) -> Result<Vec<ServerDescriptor>, McpError> {
    if !path.exists() {
        let default = McpConfigFile::with_default_server();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(&default)?)?;
        tracing::warn!(
            path = %path.display(),
            "MCP config not found, created default pointing at {}",
            DEFAULT_SERVER_URL
        );
        return Ok(default.into_descriptors());
    }

    let data = std::fs::read_to_string(path)?;
    let file: McpConfigFile = serde_json::from_str(&data)?;
    Ok(file.into_descriptors())
}
