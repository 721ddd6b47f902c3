//! 能力目录与路由表
//!
//! 目录以 (服务器名, 工具名) 为主键保存全部描述；对外暴露的工具名到服务器的路由表按
//! CollisionPolicy 决定同名冲突的归属。refresh 先在旁边构建完整快照，再整体替换
//! `Arc<CatalogSnapshot>`，读取方拿到的永远是某一次完整构建的结果。

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;

use crate::llm::ToolSpec;
use crate::mcp::{SessionRegistry, Tool};

/// 同名工具的归属规则（遍历顺序为服务器名字典序）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// 先登记的服务器保留该名字
    #[default]
    FirstWins,
    /// 后登记的服务器覆盖前者
    LastWins,
}

/// 单个能力描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub server: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// 一次同名冲突
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCollision {
    pub name: String,
    /// 最终路由到的服务器
    pub winner: String,
    pub shadowed: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Tool '{0}' not found in routing table")]
    NotFound(String),
}

/// 某次构建的不可变目录
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    descriptors: BTreeMap<(String, String), CapabilityDescriptor>,
    routes: BTreeMap<String, String>,
    collisions: Vec<NameCollision>,
}

impl CatalogSnapshot {
    /// 由各服务器的工具列表构建；listings 的顺序即登记顺序
    pub fn build(listings: Vec<(String, Vec<Tool>)>, policy: CollisionPolicy) -> Self {
        let mut snap = CatalogSnapshot::default();
        for (server, tools) in listings {
            for tool in tools {
                let name = tool.name.to_string();
                let key = (server.clone(), name.clone());
                if snap.descriptors.contains_key(&key) {
                    tracing::warn!(server = %server, tool = %name, "Duplicate tool in one listing, keeping first");
                    continue;
                }
                match snap.routes.get(&name).cloned() {
                    Some(existing) => {
                        let (winner, shadowed) = match policy {
                            CollisionPolicy::FirstWins => (existing, server.clone()),
                            CollisionPolicy::LastWins => (server.clone(), existing),
                        };
                        tracing::warn!(
                            tool = %name,
                            winner = %winner,
                            shadowed = %shadowed,
                            "Tool name collision"
                        );
                        snap.routes.insert(name.clone(), winner.clone());
                        snap.collisions.push(NameCollision {
                            name: name.clone(),
                            winner,
                            shadowed,
                        });
                    }
                    None => {
                        snap.routes.insert(name.clone(), server.clone());
                    }
                }
                snap.descriptors.insert(
                    key,
                    CapabilityDescriptor {
                        server: server.clone(),
                        description: tool
                            .description
                            .as_deref()
                            .map(str::trim)
                            .filter(|d| !d.is_empty())
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("MCP tool from {server}")),
                        input_schema: Value::Object(tool.input_schema.as_ref().clone()),
                        name,
                    },
                );
            }
        }
        snap
    }

    pub fn resolve(&self, name: &str) -> Result<&str, RoutingError> {
        self.routes
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| RoutingError::NotFound(name.to_string()))
    }

    /// 对外暴露的能力（每个路由项一条，按名字排序）
    pub fn exposed(&self) -> Vec<&CapabilityDescriptor> {
        self.routes
            .iter()
            .filter_map(|(name, server)| self.descriptors.get(&(server.clone(), name.clone())))
            .collect()
    }

    pub fn get(&self, server: &str, name: &str) -> Option<&CapabilityDescriptor> {
        self.descriptors.get(&(server.to_string(), name.to_string()))
    }

    /// 全部描述（含被遮蔽的同名工具）
    pub fn all(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.descriptors.values()
    }

    pub fn collisions(&self) -> &[NameCollision] {
        &self.collisions
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// 转为 Oracle 的函数声明
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.exposed()
            .into_iter()
            .map(|d| ToolSpec {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters: d.input_schema.clone(),
            })
            .collect()
    }
}

/// 共享目录：持有当前快照，refresh 时整体替换
pub struct ToolCatalog {
    policy: CollisionPolicy,
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl ToolCatalog {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            current: RwLock::new(Arc::new(CatalogSnapshot::default())),
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// 查询注册表中每个会话的工具列表并替换快照；单个会话失败只贡献零个能力
    pub async fn refresh(&self, registry: &SessionRegistry, list_timeout: Duration) -> Arc<CatalogSnapshot> {
        let queries = registry.sessions().map(|(name, session)| {
            let name = name.to_string();
            let session = session.clone();
            async move {
                let tools = match timeout(list_timeout, session.list_tools()).await {
                    Ok(Ok(tools)) => {
                        if tools.is_empty() {
                            tracing::warn!(server = %name, "Server exposes no tools");
                        }
                        tools
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(server = %name, error = %e, "Listing tools failed, server contributes nothing");
                        Vec::new()
                    }
                    Err(_) => {
                        tracing::warn!(server = %name, "Listing tools timed out, server contributes nothing");
                        Vec::new()
                    }
                };
                (name, tools)
            }
        });
        let listings = join_all(queries).await;
        let snapshot = Arc::new(CatalogSnapshot::build(listings, self.policy));
        tracing::info!(
            tools = snapshot.route_count(),
            collisions = snapshot.collisions().len(),
            "Tool catalog refreshed"
        );
        self.replace(snapshot.clone());
        snapshot
    }

    /// 原子替换当前快照
    pub fn replace(&self, snapshot: Arc<CatalogSnapshot>) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = snapshot;
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn resolve(&self, name: &str) -> Result<String, RoutingError> {
        self.snapshot().resolve(name).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::memory::{InMemoryConnector, InMemorySession};
    use crate::mcp::protocol;
    use crate::mcp::{ServerDescriptor, TransportKind};
    use serde_json::json;

    fn tool(name: &str) -> Tool {
        protocol::tool(name, format!("{name} tool"), json!({"type": "object"}))
    }

    fn listings() -> Vec<(String, Vec<Tool>)> {
        vec![
            ("alpha".into(), vec![tool("store_record"), tool("upload_document")]),
            ("beta".into(), vec![tool("store_record"), tool("extract_claim_info")]),
        ]
    }

    #[test]
    fn test_first_wins_keeps_earlier_server() {
        let snap = CatalogSnapshot::build(listings(), CollisionPolicy::FirstWins);
        assert_eq!(snap.resolve("store_record"), Ok("alpha"));
        assert_eq!(snap.resolve("extract_claim_info"), Ok("beta"));
        assert_eq!(snap.len(), 4);
        assert_eq!(snap.route_count(), 3);
        assert_eq!(snap.collisions().len(), 1);
        assert_eq!(snap.collisions()[0].shadowed, "beta");
        // 被遮蔽的描述仍按复合键保留
        assert!(snap.get("beta", "store_record").is_some());
    }

    #[test]
    fn test_last_wins_overwrites() {
        let snap = CatalogSnapshot::build(listings(), CollisionPolicy::LastWins);
        assert_eq!(snap.resolve("store_record"), Ok("beta"));
        assert_eq!(snap.exposed().len(), snap.route_count());
    }

    #[test]
    fn test_resolve_unknown() {
        let snap = CatalogSnapshot::build(listings(), CollisionPolicy::FirstWins);
        assert_eq!(
            snap.resolve("unknown_tool"),
            Err(RoutingError::NotFound("unknown_tool".into()))
        );
        assert_eq!(
            RoutingError::NotFound("x".into()).to_string(),
            "Tool 'x' not found in routing table"
        );
    }

    #[test]
    fn test_tool_specs_follow_routes() {
        let snap = CatalogSnapshot::build(listings(), CollisionPolicy::FirstWins);
        let specs = snap.tool_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["extract_claim_info", "store_record", "upload_document"]);
        assert_eq!(specs[1].description, "store_record tool");
    }

    #[test]
    fn test_replace_swaps_whole_snapshot() {
        let catalog = ToolCatalog::new(CollisionPolicy::FirstWins);
        assert!(catalog.snapshot().is_empty());
        let before = catalog.snapshot();
        catalog.replace(Arc::new(CatalogSnapshot::build(listings(), CollisionPolicy::FirstWins)));
        // 旧快照的持有者不受影响
        assert!(before.is_empty());
        assert_eq!(catalog.resolve("upload_document"), Ok("alpha".to_string()));
    }

    #[test]
    fn test_missing_description_falls_back_to_server() {
        let mut bare: Tool = serde_json::from_value(json!({
            "name": "check_status",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        let snap = CatalogSnapshot::build(vec![("claims".into(), vec![bare.clone()])], CollisionPolicy::FirstWins);
        assert_eq!(snap.tool_specs()[0].description, "MCP tool from claims");

        bare.description = Some("  ".into());
        let snap = CatalogSnapshot::build(vec![("claims".into(), vec![bare])], CollisionPolicy::FirstWins);
        assert_eq!(snap.tool_specs()[0].description, "MCP tool from claims");
    }

    #[tokio::test]
    async fn test_failed_listing_contributes_nothing() {
        let connector = InMemoryConnector::new()
            .with_session(InMemorySession::new("broken").with_static_tool("store_record", "{}").failing_list())
            .with_session(InMemorySession::new("healthy").with_static_tool("upload_document", "{}"));
        let mut registry = SessionRegistry::new(5);
        let report = registry
            .connect(
                &[
                    ServerDescriptor::new("broken", "http://broken/sse", TransportKind::Sse),
                    ServerDescriptor::new("healthy", "http://healthy/sse", TransportKind::Sse),
                ],
                &connector,
            )
            .await;
        assert_eq!(report.connected.len(), 2);

        let catalog = ToolCatalog::new(CollisionPolicy::FirstWins);
        let snap = catalog.refresh(&registry, Duration::from_secs(5)).await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.resolve("upload_document"), Ok("healthy"));
        assert!(snap.resolve("store_record").is_err());
        assert!(snap.all().all(|d| d.server != "broken"));
        // 会话本身仍在注册表中，只是没有贡献能力
        assert!(registry.get("broken").is_some());
    }
}
