//! 会话注册表：每个服务器名至多一条活动会话
//!
//! connect 并发建立全部启用的会话，单个失败只记录并跳过（部分成功）；teardown 尽力关闭全部会话。
//! 注册表是编排上下文持有的普通值，路由与派发通过引用访问。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::time::timeout;

use crate::mcp::{McpError, McpSession, ServerDescriptor, SessionConnector, TransportKind};

/// 一次 connect 的结果汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectReport {
    pub connected: Vec<String>,
    /// (服务器名, 原因)：禁用、传输方式未知、已连接
    pub skipped: Vec<(String, String)>,
    /// (服务器名, 错误)
    pub failed: Vec<(String, String)>,
}

impl ConnectReport {
    pub fn any_connected(&self) -> bool {
        !self.connected.is_empty()
    }
}

pub struct SessionRegistry {
    sessions: BTreeMap<String, Arc<dyn McpSession>>,
    connect_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(connect_timeout_secs: u64) -> Self {
        Self {
            sessions: BTreeMap::new(),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        }
    }

    /// 并发连接所有启用的描述符；失败的描述符不会进入注册表，也不影响其它描述符
    pub async fn connect(
        &mut self,
        descriptors: &[ServerDescriptor],
        connector: &dyn SessionConnector,
    ) -> ConnectReport {
        let mut report = ConnectReport::default();
        let mut targets = Vec::new();

        for d in descriptors {
            if !d.enabled {
                tracing::info!(server = %d.name, "Server disabled, skipping");
                report.skipped.push((d.name.clone(), "disabled".into()));
            } else if d.transport == TransportKind::Unknown {
                tracing::warn!(server = %d.name, "Unknown transport, skipping");
                report.skipped.push((d.name.clone(), "unknown transport".into()));
            } else if self.sessions.contains_key(&d.name) {
                report.skipped.push((d.name.clone(), "already connected".into()));
            } else if targets.iter().any(|t: &&ServerDescriptor| t.name == d.name) {
                report.skipped.push((d.name.clone(), "duplicate descriptor".into()));
            } else {
                targets.push(d);
            }
        }

        let connect_timeout = self.connect_timeout;
        let attempts = targets.iter().map(|d| async move {
            let res = match timeout(connect_timeout, connector.connect(d)).await {
                Ok(r) => r,
                Err(_) => Err(McpError::Timeout(format!("connecting to {}", d.name))),
            };
            (d.name.clone(), d.url.clone(), res)
        });

        for (name, url, res) in join_all(attempts).await {
            match res {
                Ok(session) => {
                    tracing::info!(server = %name, url = %url, "Connected");
                    self.sessions.insert(name.clone(), session);
                    report.connected.push(name);
                }
                Err(e) => {
                    tracing::warn!(server = %name, url = %url, error = %e, "Connect failed, skipping server");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report
    }

    /// 直接登记一条已建立的会话（同名时替换并返回旧会话）
    pub fn insert(&mut self, session: Arc<dyn McpSession>) -> Option<Arc<dyn McpSession>> {
        self.sessions
            .insert(session.server_name().to_string(), session)
    }

    pub fn get(&self, server: &str) -> Option<Arc<dyn McpSession>> {
        self.sessions.get(server).cloned()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// 按服务器名顺序遍历会话
    pub fn sessions(&self) -> impl Iterator<Item = (&str, &Arc<dyn McpSession>)> {
        self.sessions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 关闭并移除全部会话；单个关闭失败只记录警告。返回成功关闭的数量
    pub async fn teardown(&mut self) -> usize {
        let sessions = std::mem::take(&mut self.sessions);
        let mut closed = 0;
        for (name, session) in sessions {
            match session.close().await {
                Ok(()) => {
                    closed += 1;
                    tracing::info!(server = %name, "Session closed");
                }
                Err(e) => tracing::warn!(server = %name, error = %e, "Failed to close session"),
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::memory::{InMemoryConnector, InMemorySession};
    use crate::mcp::protocol::text_result;

    fn sse(name: &str) -> ServerDescriptor {
        ServerDescriptor::new(name, format!("http://{name}/sse"), TransportKind::Sse)
    }

    #[tokio::test]
    async fn test_connect_partial_success() {
        let connector = InMemoryConnector::new()
            .with_session(InMemorySession::new("claims"))
            .with_session(InMemorySession::new("docs"))
            .unreachable("down");
        let mut registry = SessionRegistry::new(5);
        let report = registry
            .connect(&[sse("claims"), sse("down"), sse("docs")], &connector)
            .await;
        assert_eq!(registry.server_names(), vec!["claims", "docs"]);
        assert_eq!(report.connected.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "down");
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_are_skipped() {
        let connector = InMemoryConnector::new()
            .with_session(InMemorySession::new("a"))
            .with_session(InMemorySession::new("b"));
        let mut registry = SessionRegistry::new(5);
        let odd = ServerDescriptor::new("b", "ws://b", TransportKind::Unknown);
        let report = registry
            .connect(&[sse("a").disabled(), odd], &connector)
            .await;
        assert!(registry.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert!(!report.any_connected());
    }

    #[tokio::test]
    async fn test_second_connect_keeps_single_session_per_name() {
        let connector = InMemoryConnector::new().with_session(InMemorySession::new("claims"));
        let mut registry = SessionRegistry::new(5);
        registry.connect(&[sse("claims")], &connector).await;
        let report = registry.connect(&[sse("claims")], &connector).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(report.skipped[0].1, "already connected");
    }

    #[tokio::test]
    async fn test_teardown_tolerates_close_failures() {
        let broken = InMemorySession::new("broken").failing_close();
        let fine = InMemorySession::new("fine").with_tool(
            "noop",
            "does nothing",
            serde_json::json!({"type": "object"}),
            |_| Ok(text_result("{}")),
        );
        let fine_handle = fine.clone();
        let connector = InMemoryConnector::new()
            .with_session(broken)
            .with_session(fine);
        let mut registry = SessionRegistry::new(5);
        registry
            .connect(&[sse("broken"), sse("fine")], &connector)
            .await;
        let closed = registry.teardown().await;
        assert_eq!(closed, 1);
        assert!(registry.is_empty());
        assert!(fine_handle.is_closed());
    }
}
