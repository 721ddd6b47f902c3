//! Streamable HTTP 会话：基于 rmcp 的 `StreamableHttpClientTransport`
//!
//! 握手、`Mcp-Session-Id` 回传、SSE 形式的响应体与 tools/list 翻页都由 rmcp 处理；
//! 这里只负责鉴权头、超时与错误归类。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use rmcp::model::{CallToolRequestParam, ClientInfo};
use rmcp::service::{Peer, RunningService, ServiceError};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use tokio::time::timeout;

use crate::mcp::protocol::{CallToolResult, Tool};
use crate::mcp::{McpError, McpSession, ServerDescriptor};

impl From<ServiceError> for McpError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::McpError(err) => McpError::Rpc {
                code: i64::from(err.code.0),
                message: err.message.into_owned(),
            },
            ServiceError::TransportClosed => McpError::Closed,
            other => McpError::Protocol(other.to_string()),
        }
    }
}

fn client_info() -> ClientInfo {
    let mut info = ClientInfo::default();
    info.client_info.name = env!("CARGO_PKG_NAME").to_string();
    info.client_info.version = env!("CARGO_PKG_VERSION").to_string();
    info
}

pub struct StreamableMcpSession {
    name: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
    request_timeout: Duration,
}

impl StreamableMcpSession {
    /// 建立传输并完成 initialize 握手；鉴权头作为 HTTP 客户端的默认头随每个请求发送
    pub async fn connect(
        descriptor: &ServerDescriptor,
        headers: HeaderMap,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(headers)
            .build()?;
        let config = StreamableHttpClientTransportConfig::with_uri(descriptor.url.clone());
        let transport = StreamableHttpClientTransport::with_client(http, config);

        let service = timeout(connect_timeout, client_info().serve(transport))
            .await
            .map_err(|_| McpError::Timeout(format!("initialize {}", descriptor.name)))?
            .map_err(|e| McpError::Protocol(format!("initialize {}: {e}", descriptor.name)))?;

        tracing::debug!(server = %descriptor.name, "Streamable HTTP handshake done");

        Ok(Self {
            name: descriptor.name.clone(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            request_timeout,
        })
    }
}

#[async_trait]
impl McpSession for StreamableMcpSession {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let tools = timeout(self.request_timeout, self.peer.list_all_tools())
            .await
            .map_err(|_| McpError::Timeout(format!("tools/list on {}", self.name)))??;
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(McpError::Protocol(format!(
                    "arguments for {name} must be a JSON object, got {other}"
                )))
            }
        };
        let params: CallToolRequestParam =
            serde_json::from_value(serde_json::json!({ "name": name, "arguments": arguments }))?;
        let result = timeout(self.request_timeout, self.peer.call_tool(params))
            .await
            .map_err(|_| McpError::Timeout(format!("tools/call on {}", self.name)))??;
        Ok(result)
    }

    async fn close(&self) -> Result<(), McpError> {
        let service = self.service.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(service) = service else {
            return Ok(());
        };
        service
            .cancel()
            .await
            .map_err(|e| McpError::Protocol(format!("closing {}: {e}", self.name)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::TransportKind;

    #[test]
    fn test_client_info_names_this_crate() {
        let info = client_info();
        assert_eq!(info.client_info.name, env!("CARGO_PKG_NAME"));
        assert_eq!(info.client_info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_rpc_error_keeps_code() {
        let err = ServiceError::McpError(rmcp::model::ErrorData::invalid_params("missing policy_number", None));
        match McpError::from(err) {
            McpError::Rpc { code, message } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "missing policy_number");
            }
            other => panic!("Expected Rpc error, got {other:?}"),
        }
        assert!(matches!(McpError::from(ServiceError::TransportClosed), McpError::Closed));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_to_connect() {
        // 先绑定再释放，拿到一个无人监听的端口
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let d = ServerDescriptor::new("gone", format!("http://{addr}/mcp"), TransportKind::StreamableHttp);
        let res = StreamableMcpSession::connect(
            &d,
            HeaderMap::new(),
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .await;
        assert!(res.is_err());
    }
}
