//! 内存会话与连接器：不走网络的 McpSession 实现，用于测试与本地演练
//!
//! 克隆出的句柄共享调用记录与关闭状态，测试可在会话交给注册表后继续观察它。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::mcp::protocol::{self, CallToolResult, Tool};
use crate::mcp::{McpError, McpSession, ServerDescriptor, SessionConnector};

type Handler = Arc<dyn Fn(&Value) -> Result<CallToolResult, McpError> + Send + Sync>;

#[derive(Clone)]
pub struct InMemorySession {
    name: String,
    tools: Vec<Tool>,
    handlers: HashMap<String, Handler>,
    list_fails: bool,
    close_fails: bool,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    closed: Arc<AtomicBool>,
}

impl InMemorySession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            handlers: HashMap::new(),
            list_fails: false,
            close_fails: false,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 注册一个工具及其响应函数
    pub fn with_tool<F>(mut self, name: &str, description: &str, schema: Value, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<CallToolResult, McpError> + Send + Sync + 'static,
    {
        self.tools.push(protocol::tool(name, description, schema));
        self.handlers.insert(name.to_string(), Arc::new(handler));
        self
    }

    /// 注册一个总是返回固定文本的工具
    pub fn with_static_tool(self, name: &str, response: &str) -> Self {
        let response = response.to_string();
        self.with_tool(
            name,
            name,
            serde_json::json!({"type": "object", "properties": {}}),
            move |_| Ok(protocol::text_result(response.clone())),
        )
    }

    pub fn failing_list(mut self) -> Self {
        self.list_fails = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.close_fails = true;
        self
    }

    /// 每次 call_tool 前等待的时长
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已收到的调用（工具名, 参数），按到达顺序
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpSession for InMemorySession {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        if self.list_fails {
            return Err(McpError::Protocol(format!("{} refused tools/list", self.name)));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.to_string(), arguments.clone()));
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match self.handlers.get(name) {
            Some(h) => h(&arguments),
            None => Err(McpError::Rpc {
                code: -32602,
                message: format!("Unknown tool: {name}"),
            }),
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        if self.close_fails {
            return Err(McpError::Http("close failed".into()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// 从预置会话中按服务器名“连接”
#[derive(Default)]
pub struct InMemoryConnector {
    sessions: HashMap<String, InMemorySession>,
    unreachable: HashSet<String>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: InMemorySession) -> Self {
        self.sessions.insert(session.name.clone(), session);
        self
    }

    /// 该服务器名的连接总是失败
    pub fn unreachable(mut self, name: &str) -> Self {
        self.unreachable.insert(name.to_string());
        self
    }
}

#[async_trait]
impl SessionConnector for InMemoryConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Arc<dyn McpSession>, McpError> {
        if self.unreachable.contains(&descriptor.name) {
            return Err(McpError::Refused(descriptor.url.clone()));
        }
        match self.sessions.get(&descriptor.name) {
            Some(s) => Ok(Arc::new(s.clone())),
            None => Err(McpError::Refused(descriptor.url.clone())),
        }
    }
}
