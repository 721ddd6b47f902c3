//! 无头引擎运行时
//!
//! Engine 持有注册表、能力目录、注入策略与 Oracle：connect -> refresh -> 逐个文档 process_document -> teardown。
//! 同一时刻只处理一个文档；目录刷新整体替换快照。CLI 的 call 子命令也经由同一条派发路径。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::context::{ArtifactId, InjectionPolicy, PayloadContext};
use crate::core::{AgentError, FailureKind, RecoveryAction, RecoveryEngine};
use crate::extract::{ExtractError, PlainTextExtractor, TextExtractor};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::mcp::{ConnectReport, HttpConnector, McpError, ServerDescriptor, SessionConnector, SessionRegistry};
use crate::outcome::{FileOutcomeStore, OutcomeRecorder, ProcessingOutcome, RunSubject};
use crate::react::{build_initial_prompt, run_document_loop, RunEvent, RunSession};
use crate::tools::{CatalogSnapshot, CollisionPolicy, DispatchResult, Dispatcher, ToolCatalog};

/// 后端服务器 API Key 的环境变量
pub const MCP_KEY_ENV: &str = "MCP_SERVER_KEY";

/// 引擎运行参数（来自 [mcp] / [agent] 配置）
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_iterations: usize,
    pub max_document_chars: usize,
    pub collision_policy: CollisionPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            request_timeout_secs: 30,
            max_iterations: 10,
            max_document_chars: 4000,
            collision_policy: CollisionPolicy::FirstWins,
        }
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            connect_timeout_secs: cfg.mcp.connect_timeout_secs,
            request_timeout_secs: cfg.mcp.request_timeout_secs,
            max_iterations: cfg.agent.max_iterations,
            max_document_chars: cfg.agent.max_document_chars,
            collision_policy: cfg.mcp.collision_policy,
        }
    }
}

pub struct Engine {
    registry: SessionRegistry,
    catalog: ToolCatalog,
    injection: InjectionPolicy,
    oracle: Arc<dyn LlmClient>,
    extractor: Arc<dyn TextExtractor>,
    recorder: OutcomeRecorder,
    recovery: RecoveryEngine,
    store: Option<FileOutcomeStore>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(oracle: Arc<dyn LlmClient>, settings: EngineSettings) -> Self {
        let recorder = OutcomeRecorder::new(oracle.model());
        Self {
            registry: SessionRegistry::new(settings.connect_timeout_secs),
            catalog: ToolCatalog::new(settings.collision_policy),
            injection: InjectionPolicy::from_config(&[]),
            oracle,
            extractor: Arc::new(PlainTextExtractor::new()),
            recorder,
            recovery: RecoveryEngine::new(),
            store: None,
            settings,
        }
    }

    /// 按配置构建：Oracle、注入规则、输出目录
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(create_llm_from_config(&cfg.llm), EngineSettings::from_config(cfg))
            .with_injection(InjectionPolicy::from_config(&cfg.injection.rules))
            .with_store(FileOutcomeStore::new(&cfg.app.output_dir))
    }

    pub fn with_injection(mut self, policy: InjectionPolicy) -> Self {
        self.injection = policy;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_store(mut self, store: FileOutcomeStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// 连接全部描述符并刷新一次目录；部分失败不是错误
    pub async fn connect(
        &mut self,
        descriptors: &[ServerDescriptor],
        connector: &dyn SessionConnector,
    ) -> ConnectReport {
        let report = self.registry.connect(descriptors, connector).await;
        for (name, err) in &report.failed {
            tracing::warn!(server = %name, error = %err, "Server not connected, continuing without it");
        }
        let snapshot = self.refresh().await;
        tracing::info!(
            sessions = self.registry.len(),
            tools = snapshot.route_count(),
            "Engine connected"
        );
        report
    }

    pub async fn refresh(&self) -> Arc<CatalogSnapshot> {
        self.catalog
            .refresh(&self.registry, Duration::from_secs(self.settings.request_timeout_secs))
            .await
    }

    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(&self.registry, &self.catalog, self.settings.request_timeout_secs)
            .with_tracking(self.injection.tracked_tools())
    }

    /// 直接调用单个工具（不经过 Oracle），注入规则不生效
    pub async fn call_tool(&self, tool: &str, args: Value) -> DispatchResult {
        self.dispatcher().invoke(tool, args).await
    }

    /// 处理单个文档：抽取 -> 登记产物 -> 编排循环 -> 记录 -> 持久化。
    /// 任何终止方式都会返回 ProcessingOutcome；持久化失败只记录错误
    pub async fn process_document(
        &self,
        path: &Path,
        cancel_token: CancellationToken,
        event_tx: Option<&UnboundedSender<RunEvent>>,
    ) -> ProcessingOutcome {
        let document_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        tracing::info!(document = %document_name, "Processing document");

        let outcome = match self.prepare(path).await {
            Ok((payload, artifact, text)) => {
                let subject = RunSubject::new(&document_name, Some(artifact.clone()));
                let prompt = build_initial_prompt(&text, self.settings.max_document_chars);
                if prompt.truncated {
                    tracing::info!(document = %document_name, max = self.settings.max_document_chars, "Document text truncated");
                }

                let dispatcher = self.dispatcher();
                let mut session = RunSession::new(
                    self.oracle.as_ref(),
                    &dispatcher,
                    &self.injection,
                    &payload,
                    &artifact,
                )
                .with_max_iterations(self.settings.max_iterations)
                .with_cancel_token(cancel_token);
                if let Some(tx) = event_tx {
                    session = session.with_event_tx(tx);
                }

                let report = run_document_loop(&session, prompt.into_messages()).await;
                self.recorder.finalize(&subject, report)
            }
            Err(e) => self.abort_before_loop(&RunSubject::new(&document_name, None), e),
        };

        self.persist(outcome)
    }

    async fn prepare(&self, path: &Path) -> Result<(PayloadContext, ArtifactId, String), AgentError> {
        let text = self.extractor.extract(path).await?;
        let mut payload = PayloadContext::new();
        let receipt = payload.register_file(path).await.map_err(ExtractError::Io)?;
        tracing::info!(artifact = %receipt.id, size = receipt.size, "Artifact registered");
        Ok((payload, receipt.id, text))
    }

    fn abort_before_loop(&self, subject: &RunSubject, err: AgentError) -> ProcessingOutcome {
        tracing::error!(document = %subject.document_name, error = %err, "Run aborted before the loop");
        match self.recovery.handle(&err) {
            RecoveryAction::Abort { kind, reason } => self.recorder.failed_before_loop(subject, kind, reason),
            _ => self
                .recorder
                .failed_before_loop(subject, FailureKind::Extraction, err.to_string()),
        }
    }

    fn persist(&self, outcome: ProcessingOutcome) -> ProcessingOutcome {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&outcome) {
                tracing::error!(run_id = %outcome.run_id, error = %e, "Failed to persist outcome");
            }
        }
        outcome
    }

    /// 关闭全部会话并清空目录
    pub async fn teardown(&mut self) -> usize {
        let closed = self.registry.teardown().await;
        self.catalog
            .replace(Arc::new(CatalogSnapshot::build(Vec::new(), self.settings.collision_policy)));
        closed
    }
}

/// 按 [mcp] 配置与 MCP_SERVER_KEY 环境变量构建 HTTP 连接器
pub fn connector_from_config(cfg: &AppConfig) -> Result<HttpConnector, McpError> {
    let key = std::env::var(MCP_KEY_ENV).ok().filter(|k| !k.is_empty());
    if key.is_none() {
        tracing::warn!("{} not set, MCP servers without auth_header are called unauthenticated", MCP_KEY_ENV);
    }
    HttpConnector::new(
        cfg.mcp.api_key_header.clone(),
        key,
        cfg.mcp.connect_timeout_secs,
        cfg.mcp.request_timeout_secs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{OracleReply, ScriptedLlmClient};
    use crate::mcp::memory::{InMemoryConnector, InMemorySession};
    use crate::mcp::TransportKind;
    use crate::outcome::TerminalState;

    #[tokio::test]
    async fn test_extraction_failure_yields_zero_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "   ").unwrap();
        let oracle = Arc::new(ScriptedLlmClient::replies(vec![OracleReply::text("never")]));
        let engine = Engine::new(oracle.clone(), EngineSettings::default())
            .with_store(FileOutcomeStore::new(dir.path().join("out")));

        let outcome = engine
            .process_document(&path, CancellationToken::new(), None)
            .await;
        assert_eq!(outcome.state, TerminalState::Failed);
        assert_eq!(outcome.failure_kind, Some(FailureKind::Extraction));
        assert_eq!(outcome.iterations, 0);
        assert_eq!(oracle.request_count(), 0);
        assert!(dir.path().join("out").join(format!("{}.json", outcome.run_id)).exists());
    }

    #[tokio::test]
    async fn test_call_tool_and_teardown() {
        let session = InMemorySession::new("claims")
            .with_static_tool("check_status", r#"{"success": true, "status": "open"}"#);
        let handle = session.clone();
        let connector = InMemoryConnector::new().with_session(session);
        let oracle = Arc::new(ScriptedLlmClient::new(Vec::new()));
        let mut engine = Engine::new(oracle, EngineSettings::default());
        let report = engine
            .connect(
                &[ServerDescriptor::new("claims", "http://x/sse", TransportKind::Sse)],
                &connector,
            )
            .await;
        assert!(report.any_connected());
        assert_eq!(engine.catalog().snapshot().route_count(), 1);

        let r = engine.call_tool("check_status", serde_json::json!({"claim_id": "C-1"})).await;
        assert_eq!(r.outcome(), "ok");
        assert!(r.text().contains("open"));

        assert_eq!(engine.teardown().await, 1);
        assert!(handle.is_closed());
        assert!(engine.catalog().snapshot().is_empty());
    }
}
