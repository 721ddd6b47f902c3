//! 工具派发器
//!
//! invoke(tool_name, args)：经目录解析所属服务器，从注册表取会话，在超时内执行远程调用；
//! 路由、会话、传输、超时故障都以 DispatchError 数据返回（渲染成 JSON 工具结果），绝不向
//! 编排循环抛出。每次调用输出一条结构化审计日志（JSON）。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;

use crate::mcp::{SessionRegistry, ToolResultText};
use crate::tools::{ToolCatalog, ToolEnvelope};

/// 空结果的规范化文本
pub const EMPTY_RESULT: &str = r#"{"status":"success","content":"empty"}"#;
/// 追踪产物 id 时默认的引用名
pub const UNKNOWN_REFERENCE: &str = "unknown";

/// 未送达业务层的调用故障（均可恢复：写回给 Oracle）
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("Tool '{tool}' not found in routing table")]
    UnknownTool { tool: String },

    #[error("Session for server '{server}' is not active")]
    SessionUnavailable { server: String },

    #[error("Execution failed on {server}: {message}")]
    Transport { server: String, message: String },

    #[error("Execution on {server} timed out after {secs}s")]
    Timeout { server: String, secs: u64 },

    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },
}

impl DispatchError {
    /// 审计日志中的 outcome 字段
    pub fn outcome(&self) -> &'static str {
        match self {
            DispatchError::UnknownTool { .. } => "routing",
            DispatchError::SessionUnavailable { .. } => "session",
            DispatchError::Transport { .. } => "transport",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::InvalidArguments { .. } => "arguments",
        }
    }

    /// 写回会话的工具结果文本
    pub fn to_tool_text(&self) -> String {
        serde_json::json!({ "error": self.to_string(), "kind": self.outcome() }).to_string()
    }
}

/// 一次派发的结果
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// 远程调用完成；业务成功与否看 envelope
    Delivered {
        server: String,
        text: String,
        envelope: ToolEnvelope,
        /// 被追踪工具成功返回的产物 id
        tracked_document_id: Option<String>,
    },
    Undelivered(DispatchError),
}

impl DispatchResult {
    /// 写回会话的原始文本
    pub fn text(&self) -> String {
        match self {
            DispatchResult::Delivered { text, .. } => text.clone(),
            DispatchResult::Undelivered(e) => e.to_tool_text(),
        }
    }

    pub fn server(&self) -> Option<&str> {
        match self {
            DispatchResult::Delivered { server, .. } => Some(server),
            DispatchResult::Undelivered(DispatchError::SessionUnavailable { server })
            | DispatchResult::Undelivered(DispatchError::Transport { server, .. })
            | DispatchResult::Undelivered(DispatchError::Timeout { server, .. }) => Some(server),
            DispatchResult::Undelivered(_) => None,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            DispatchResult::Delivered { envelope, .. } if envelope.is_failure() => "app_error",
            DispatchResult::Delivered { .. } => "ok",
            DispatchResult::Undelivered(e) => e.outcome(),
        }
    }
}

/// 本次运行中记录的「引用名 -> 产物 id」
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ArtifactTracker {
    ids: BTreeMap<String, String>,
}

impl ArtifactTracker {
    pub fn record(&mut self, reference: impl Into<String>, document_id: impl Into<String>) {
        self.ids.insert(reference.into(), document_id.into());
    }

    pub fn get(&self, reference: &str) -> Option<&str> {
        self.ids.get(reference).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.ids
    }
}

/// 派发器：借用编排上下文中的注册表与目录
pub struct Dispatcher<'a> {
    registry: &'a SessionRegistry,
    catalog: &'a ToolCatalog,
    timeout: Duration,
    tracked: BTreeSet<String>,
    tracker: Mutex<ArtifactTracker>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a SessionRegistry, catalog: &'a ToolCatalog, timeout_secs: u64) -> Self {
        Self {
            registry,
            catalog,
            timeout: Duration::from_secs(timeout_secs),
            tracked: BTreeSet::new(),
            tracker: Mutex::new(ArtifactTracker::default()),
        }
    }

    /// 这些工具的成功结果中的 document_id 会被记录
    pub fn with_tracking<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        self.catalog
    }

    pub fn is_tracked(&self, tool: &str) -> bool {
        self.tracked.contains(tool)
    }

    /// 执行指定工具；返回值永远是 DispatchResult，不会出错
    pub async fn invoke(&self, tool_name: &str, args: Value) -> DispatchResult {
        let start = Instant::now();
        let preview = args_preview(&args);
        let reference = args
            .get("document_name")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_REFERENCE)
            .to_string();

        let result = self.invoke_inner(tool_name, args).await;
        let result = match result {
            DispatchResult::Delivered {
                server,
                text,
                envelope,
                ..
            } => {
                let tracked_document_id = if self.is_tracked(tool_name) {
                    envelope.document_id()
                } else {
                    None
                };
                if let Some(id) = &tracked_document_id {
                    tracing::info!(tool = tool_name, reference = %reference, document_id = %id, "Tracked document id");
                    self.tracker
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .record(reference.clone(), id.clone());
                }
                DispatchResult::Delivered {
                    server,
                    text,
                    envelope,
                    tracked_document_id,
                }
            }
            undelivered => undelivered,
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "server": result.server(),
            "ok": result.outcome() == "ok",
            "outcome": result.outcome(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    async fn invoke_inner(&self, tool_name: &str, args: Value) -> DispatchResult {
        let server = match self.catalog.resolve(tool_name) {
            Ok(s) => s,
            Err(_) => {
                return DispatchResult::Undelivered(DispatchError::UnknownTool {
                    tool: tool_name.to_string(),
                })
            }
        };
        let Some(session) = self.registry.get(&server) else {
            return DispatchResult::Undelivered(DispatchError::SessionUnavailable { server });
        };

        match timeout(self.timeout, session.call_tool(tool_name, args)).await {
            Ok(Ok(result)) => {
                let mut text = result.joined_text();
                if text.trim().is_empty() {
                    text = EMPTY_RESULT.to_string();
                }
                let envelope = ToolEnvelope::decode(&text, result.flagged_error());
                DispatchResult::Delivered {
                    server,
                    text,
                    envelope,
                    tracked_document_id: None,
                }
            }
            Ok(Err(e)) => DispatchResult::Undelivered(DispatchError::Transport {
                server,
                message: e.to_string(),
            }),
            Err(_) => DispatchResult::Undelivered(DispatchError::Timeout {
                server,
                secs: self.timeout.as_secs(),
            }),
        }
    }

    /// 当前已记录的产物 id
    pub fn tracked_documents(&self) -> ArtifactTracker {
        self.tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::memory::{InMemoryConnector, InMemorySession};
    use crate::mcp::protocol::CallToolResult;
    use crate::mcp::{McpError, McpSession, ServerDescriptor, TransportKind};
    use crate::tools::CollisionPolicy;
    use serde_json::json;

    async fn setup(session: InMemorySession) -> (SessionRegistry, ToolCatalog) {
        let name = session.server_name().to_string();
        let connector = InMemoryConnector::new().with_session(session);
        let mut registry = SessionRegistry::new(5);
        registry
            .connect(
                &[ServerDescriptor::new(&name, "http://x/sse", TransportKind::Sse)],
                &connector,
            )
            .await;
        let catalog = ToolCatalog::new(CollisionPolicy::FirstWins);
        catalog.refresh(&registry, Duration::from_secs(5)).await;
        (registry, catalog)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_routing_error() {
        let (registry, catalog) = setup(InMemorySession::new("claims")).await;
        let d = Dispatcher::new(&registry, &catalog, 5);
        let r = d.invoke("unknown_tool", json!({})).await;
        assert_eq!(r.outcome(), "routing");
        let v: Value = serde_json::from_str(&r.text()).unwrap();
        assert_eq!(v["error"], "Tool 'unknown_tool' not found in routing table");
    }

    #[tokio::test]
    async fn test_session_missing_after_teardown() {
        let (mut registry, catalog) =
            setup(InMemorySession::new("claims").with_static_tool("store_record", "{}")).await;
        registry.teardown().await;
        let d = Dispatcher::new(&registry, &catalog, 5);
        let r = d.invoke("store_record", json!({})).await;
        assert!(matches!(
            r,
            DispatchResult::Undelivered(DispatchError::SessionUnavailable { ref server }) if server == "claims"
        ));
    }

    #[tokio::test]
    async fn test_transport_fault_is_captured() {
        let s = InMemorySession::new("claims").with_tool(
            "store_record",
            "store",
            json!({"type": "object"}),
            |_| Err(McpError::Http("connection reset".into())),
        );
        let (registry, catalog) = setup(s).await;
        let d = Dispatcher::new(&registry, &catalog, 5);
        let r = d.invoke("store_record", json!({})).await;
        assert_eq!(r.outcome(), "transport");
        assert!(r.text().contains("Execution failed on claims"));
    }

    #[tokio::test]
    async fn test_timeout_is_captured() {
        let s = InMemorySession::new("slow")
            .with_static_tool("store_record", "{}")
            .with_delay(Duration::from_secs(3));
        let (registry, catalog) = setup(s).await;
        let d = Dispatcher::new(&registry, &catalog, 1);
        let r = d.invoke("store_record", json!({})).await;
        assert_eq!(r.outcome(), "timeout");
    }

    #[tokio::test]
    async fn test_empty_result_is_normalized() {
        let s = InMemorySession::new("claims").with_tool(
            "ping",
            "ping",
            json!({"type": "object"}),
            |_| Ok(CallToolResult::success(Vec::new())),
        );
        let (registry, catalog) = setup(s).await;
        let d = Dispatcher::new(&registry, &catalog, 5);
        let r = d.invoke("ping", json!({})).await;
        assert_eq!(r.text(), EMPTY_RESULT);
        assert_eq!(r.outcome(), "ok");
    }

    #[tokio::test]
    async fn test_tracks_document_id_under_reference_name() {
        let s = InMemorySession::new("claims").with_static_tool(
            "upload_document",
            r#"{"success": true, "document_id": "DOC-77"}"#,
        );
        let (registry, catalog) = setup(s).await;
        let d = Dispatcher::new(&registry, &catalog, 5).with_tracking(["upload_document"]);
        let r = d
            .invoke("upload_document", json!({"document_name": "claim.pdf"}))
            .await;
        match r {
            DispatchResult::Delivered {
                tracked_document_id, ..
            } => assert_eq!(tracked_document_id.as_deref(), Some("DOC-77")),
            other => panic!("Expected Delivered, got {other:?}"),
        }
        d.invoke("upload_document", json!({})).await;
        let tracked = d.tracked_documents();
        assert_eq!(tracked.get("claim.pdf"), Some("DOC-77"));
        assert_eq!(tracked.get(UNKNOWN_REFERENCE), Some("DOC-77"));
    }

    #[tokio::test]
    async fn test_untracked_tool_records_nothing() {
        let s = InMemorySession::new("claims")
            .with_static_tool("upload_document", r#"{"document_id": "DOC-1"}"#);
        let (registry, catalog) = setup(s).await;
        let d = Dispatcher::new(&registry, &catalog, 5);
        d.invoke("upload_document", json!({})).await;
        assert!(d.tracked_documents().is_empty());
    }
}
