//! HTTP 连接器与旧版 HTTP+SSE 会话
//!
//! 两种传输：
//! - **sse**（旧版 HTTP+SSE）：GET 打开事件流，服务器先推送 `endpoint` 事件告知 POST 地址；
//!   之后每个请求 POST 到该地址，响应经事件流返回，后台读取任务按 JSON-RPC id 派发给等待方。
//!   rmcp 客户端不提供这种传输，由本模块实现。
//! - **streamable_http**：交给 rmcp 的 `StreamableHttpClientTransport`，见 [`super::streamable`]。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::mcp::protocol::{
    initialize_params, CallToolResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, Tool,
};
use crate::mcp::sse::SseDecoder;
use crate::mcp::streamable::StreamableMcpSession;
use crate::mcp::{McpError, McpSession, ServerDescriptor, SessionConnector, TransportKind};

/// tools/list 翻页上限，防止服务器返回循环游标
const MAX_LIST_PAGES: usize = 32;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// 建立 HTTP 会话的连接器
pub struct HttpConnector {
    http: reqwest::Client,
    api_key_header: String,
    /// 描述符未配置鉴权值时使用（通常来自 MCP_SERVER_KEY）
    fallback_auth: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(
        api_key_header: impl Into<String>,
        fallback_auth: Option<String>,
        connect_timeout_secs: u64,
        request_timeout_secs: u64,
    ) -> Result<Self, McpError> {
        // 不设整体超时：SSE 事件流是长连接，单个请求在调用处加 tokio 超时
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key_header: api_key_header.into(),
            fallback_auth,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }

    fn headers_for(&self, descriptor: &ServerDescriptor) -> Result<HeaderMap, McpError> {
        let mut headers = HeaderMap::new();
        let auth = descriptor
            .auth_header
            .clone()
            .or_else(|| self.fallback_auth.clone());
        match auth {
            Some(value) => {
                let name = HeaderName::from_bytes(self.api_key_header.as_bytes())
                    .map_err(|e| McpError::Protocol(format!("invalid auth header name: {e}")))?;
                let value = HeaderValue::from_str(&value)
                    .map_err(|e| McpError::Protocol(format!("invalid auth header value: {e}")))?;
                headers.insert(name, value);
            }
            None => {
                tracing::warn!(server = %descriptor.name, "No MCP auth key configured, connecting unauthenticated");
            }
        }
        Ok(headers)
    }

    async fn connect_sse(
        &self,
        descriptor: &ServerDescriptor,
        url: Url,
        headers: HeaderMap,
    ) -> Result<Arc<dyn McpSession>, McpError> {
        let channel = timeout(self.connect_timeout, SseChannel::open(&self.http, url, &headers))
            .await
            .map_err(|_| McpError::Timeout(format!("opening event stream for {}", descriptor.name)))??;

        let session = SseMcpSession {
            name: descriptor.name.clone(),
            http: self.http.clone(),
            headers,
            channel,
            next_id: AtomicU64::new(1),
            request_timeout: self.request_timeout,
        };

        if let Err(e) = timeout(self.connect_timeout, session.initialize())
            .await
            .map_err(|_| McpError::Timeout(format!("initialize {}", descriptor.name)))
            .and_then(|r| r)
        {
            let _ = session.close().await;
            return Err(e);
        }
        Ok(Arc::new(session))
    }
}

#[async_trait]
impl SessionConnector for HttpConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Arc<dyn McpSession>, McpError> {
        let url = Url::parse(&descriptor.url)
            .map_err(|e| McpError::Protocol(format!("invalid url '{}': {e}", descriptor.url)))?;
        let headers = self.headers_for(descriptor)?;

        let session: Arc<dyn McpSession> = match descriptor.transport {
            TransportKind::Sse => self.connect_sse(descriptor, url, headers).await?,
            TransportKind::StreamableHttp => Arc::new(
                StreamableMcpSession::connect(
                    descriptor,
                    headers,
                    self.connect_timeout,
                    self.request_timeout,
                )
                .await?,
            ),
            TransportKind::Unknown => {
                return Err(McpError::UnsupportedTransport(descriptor.transport.to_string()))
            }
        };

        tracing::info!(server = %descriptor.name, transport = %descriptor.transport, "MCP session initialized");
        Ok(session)
    }
}

/// 事件流读取任务；句柄释放即终止任务，事件流连接随之断开
struct ReaderTask(JoinHandle<()>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// 旧版 SSE 传输：事件流读取任务 + POST 端点
struct SseChannel {
    endpoint: Url,
    pending: PendingMap,
    reader: Mutex<Option<ReaderTask>>,
}

impl SseChannel {
    /// 打开事件流并等待 endpoint 事件。任何提前返回（包括外层超时取消）都会终止读取任务
    async fn open(http: &reqwest::Client, url: Url, headers: &HeaderMap) -> Result<Self, McpError> {
        let resp = http
            .get(url.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Status { status, body });
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let reader = ReaderTask(tokio::spawn(read_event_stream(resp, pending.clone(), endpoint_tx)));

        let endpoint = endpoint_rx
            .await
            .map_err(|_| McpError::Protocol("event stream closed before endpoint event".into()))?;
        let endpoint = url
            .join(&endpoint)
            .map_err(|e| McpError::Protocol(format!("invalid endpoint '{endpoint}': {e}")))?;
        tracing::debug!(endpoint = %endpoint, "SSE endpoint received");

        Ok(Self {
            endpoint,
            pending,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// 登记一个等待方；返回的条目在释放时把 id 移出等待表
    fn register(&self, id: u64) -> (PendingEntry<'_>, oneshot::Receiver<JsonRpcResponse>) {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        (
            PendingEntry {
                pending: &self.pending,
                id,
            },
            rx,
        )
    }

    fn shutdown(&self) {
        drop(self.reader.lock().unwrap_or_else(|e| e.into_inner()).take());
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// 等待表中的一项；请求完成、出错或被超时取消时移除
struct PendingEntry<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// 后台读取事件流：首个 endpoint 事件交给连接方，其余 message 事件按 id 派发
async fn read_event_stream(
    resp: reqwest::Response,
    pending: PendingMap,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::new();
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("SSE stream error: {}", e);
                break;
            }
        };
        for ev in decoder.push(&chunk) {
            match ev.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(ev.data.trim().to_string());
                    }
                }
                "message" => route_response(&pending, &ev.data),
                other => tracing::debug!(event = other, "Ignoring SSE event"),
            }
        }
    }

    if let Some(ev) = decoder.finish().filter(|ev| ev.event == "message") {
        route_response(&pending, &ev.data);
    }
    // 流结束：丢弃所有等待方，使其收到 Closed
    pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
    tracing::debug!("SSE stream ended");
}

fn route_response(pending: &PendingMap, data: &str) {
    let resp: JsonRpcResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("Skipping non-response SSE message: {}", e);
            return;
        }
    };
    let Some(id) = resp.numeric_id() else {
        return;
    };
    let waiter = pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(resp);
        }
        None => tracing::debug!(id, "Response without waiting request"),
    }
}

/// 旧版 HTTP+SSE 会话
pub struct SseMcpSession {
    name: String,
    http: reqwest::Client,
    headers: HeaderMap,
    channel: SseChannel,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl SseMcpSession {
    async fn initialize(&self) -> Result<Value, McpError> {
        let result = self.request("initialize", Some(initialize_params())).await?;
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::request(id, method, params);
        let resp = timeout(self.request_timeout, self.exchange(id, &req))
            .await
            .map_err(|_| McpError::Timeout(format!("{} on {}", method, self.name)))??;
        resp.into_result()
    }

    /// POST 请求，再从事件流等待同 id 的响应
    async fn exchange(&self, id: u64, req: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let (_entry, rx) = self.channel.register(id);

        let resp = self
            .http
            .post(self.channel.endpoint.clone())
            .headers(self.headers.clone())
            .json(req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(McpError::Status {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        rx.await.map_err(|_| McpError::Closed)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let note = JsonRpcRequest::notification(method, params);
        let builder = self
            .http
            .post(self.channel.endpoint.clone())
            .headers(self.headers.clone())
            .json(&note);
        let resp = timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| McpError::Timeout(format!("{} on {}", method, self.name)))??;
        if !resp.status().is_success() {
            return Err(McpError::Status {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl McpSession for SseMcpSession {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
        tracing::warn!(server = %self.name, "tools/list pagination limit reached");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let result = self
            .request(
                "tools/call",
                Some(serde_json::json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn close(&self) -> Result<(), McpError> {
        self.channel.shutdown();
        Ok(())
    }
}
