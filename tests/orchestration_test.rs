//! 编排集成测试：内存 MCP 会话 + 脚本化 Oracle，不走网络

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use docflow::context::{ArtifactId, InjectedValue, InjectionPolicy, InjectionRule, PayloadContext};
use docflow::core::FailureKind;
use docflow::llm::{OracleReply, ScriptedLlmClient};
use docflow::mcp::{
    InMemoryConnector, InMemorySession, McpSession, ServerDescriptor, SessionRegistry, TransportKind,
};
use docflow::memory::Message;
use docflow::outcome::{FileOutcomeStore, OutcomeRecorder, RunSubject, TerminalState, Termination};
use docflow::react::{run_document_loop, LoopReport, RunSession};
use docflow::tools::{CollisionPolicy, Dispatcher, ToolCatalog};
use docflow::{Engine, EngineSettings};

fn sse(name: &str) -> ServerDescriptor {
    ServerDescriptor::new(name, format!("http://{name}.local/sse"), TransportKind::Sse)
}

async fn connect(sessions: Vec<InMemorySession>, connector: InMemoryConnector) -> (SessionRegistry, ToolCatalog) {
    let mut descriptors = Vec::new();
    let mut connector = connector;
    for s in sessions {
        descriptors.push(sse(s.server_name()));
        connector = connector.with_session(s);
    }
    let mut registry = SessionRegistry::new(5);
    registry.connect(&descriptors, &connector).await;
    let catalog = ToolCatalog::new(CollisionPolicy::FirstWins);
    catalog.refresh(&registry, Duration::from_secs(5)).await;
    (registry, catalog)
}

fn doc_1() -> (PayloadContext, ArtifactId) {
    let mut ctx = PayloadContext::new();
    let id = ArtifactId::new("doc_1");
    ctx.register(id.clone(), b"%PDF-1.4 claim".to_vec(), "claim.pdf");
    (ctx, id)
}

async fn run(
    registry: &SessionRegistry,
    catalog: &ToolCatalog,
    oracle: &ScriptedLlmClient,
    policy: &InjectionPolicy,
    max_iterations: usize,
) -> LoopReport {
    let (ctx, id) = doc_1();
    let dispatcher = Dispatcher::new(registry, catalog, 5).with_tracking(policy.tracked_tools());
    let session = RunSession::new(oracle, &dispatcher, policy, &ctx, &id).with_max_iterations(max_iterations);
    run_document_loop(&session, vec![Message::system("sys"), Message::user("claim text")]).await
}

#[tokio::test]
async fn test_scenario_a_direct_completion() {
    let (registry, catalog) = connect(
        vec![InMemorySession::new("claims").with_static_tool("store_record", r#"{"success": true}"#)],
        InMemoryConnector::new(),
    )
    .await;
    let oracle = ScriptedLlmClient::replies(vec![OracleReply::text("done")]);
    let report = run(&registry, &catalog, &oracle, &InjectionPolicy::default(), 10).await;

    let outcome = OutcomeRecorder::new("scripted").finalize(&RunSubject::new("claim.pdf", None), report);
    assert_eq!(outcome.state, TerminalState::Completed);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.final_text.as_deref(), Some("done"));
    assert_eq!(oracle.declared_tools(0).unwrap(), vec!["store_record".to_string()]);
}

#[tokio::test]
async fn test_scenario_b_unknown_tool_is_recoverable() {
    let (registry, catalog) = connect(
        vec![InMemorySession::new("claims").with_static_tool("store_record", "{}")],
        InMemoryConnector::new(),
    )
    .await;
    let oracle = ScriptedLlmClient::replies(vec![
        OracleReply::calls(vec![ScriptedLlmClient::call("c1", "unknown_tool", json!({}))]),
        OracleReply::text("adapted"),
    ]);
    let report = run(&registry, &catalog, &oracle, &InjectionPolicy::default(), 10).await;

    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.invocations.len(), 1);
    assert_eq!(report.invocations[0].outcome, "routing");
    let tool_turn = oracle.request(1).unwrap().last().cloned().unwrap();
    assert!(tool_turn.content.contains("Tool 'unknown_tool' not found in routing table"));
}

#[tokio::test]
async fn test_scenario_c_payload_is_injected() {
    let upload = InMemorySession::new("claims")
        .with_static_tool("upload_document", r#"{"success": true, "document_id": "DOC-42"}"#);
    let handle = upload.clone();
    let (registry, catalog) = connect(vec![upload], InMemoryConnector::new()).await;
    let policy = InjectionPolicy::new(vec![
        InjectionRule::new("upload_document").inject("payload", InjectedValue::ArtifactBytes)
    ]);
    let oracle = ScriptedLlmClient::replies(vec![
        OracleReply::calls(vec![ScriptedLlmClient::call(
            "c1",
            "upload_document",
            json!({"payload": "PLACEHOLDER", "document_name": "claim.pdf"}),
        )]),
        OracleReply::text("uploaded"),
    ]);
    let report = run(&registry, &catalog, &oracle, &policy, 10).await;

    let (ctx, id) = doc_1();
    let calls = handle.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1["payload"], Value::String(ctx.base64_of(&id).unwrap()));
    assert_ne!(calls[0].1["payload"], "PLACEHOLDER");
    assert_eq!(report.tracked.get("claim.pdf"), Some("DOC-42"));
}

#[tokio::test]
async fn test_scenario_d_application_failure_fails_fast() {
    let (registry, catalog) = connect(
        vec![InMemorySession::new("claims").with_static_tool(
            "create_claim",
            r#"{"success": false, "error": "policy_number missing"}"#,
        )],
        InMemoryConnector::new(),
    )
    .await;
    let oracle = ScriptedLlmClient::replies(vec![
        OracleReply::calls(vec![ScriptedLlmClient::call("c1", "create_claim", json!({}))]),
        OracleReply::text("should not be asked"),
    ]);
    let report = run(&registry, &catalog, &oracle, &InjectionPolicy::default(), 10).await;

    assert_eq!(report.invocations.len(), 1);
    assert_eq!(oracle.request_count(), 1);
    let outcome = OutcomeRecorder::new("scripted").finalize(&RunSubject::new("claim.pdf", None), report);
    assert_eq!(outcome.state, TerminalState::Failed);
    assert_eq!(outcome.failure_kind, Some(FailureKind::ApplicationFailure));
    assert_eq!(outcome.failure_reason.as_deref(), Some("policy_number missing"));
}

#[tokio::test]
async fn test_second_call_in_batch_not_dispatched_after_failure() {
    let failing = InMemorySession::new("claims")
        .with_static_tool("create_claim", r#"{"success": false, "error": "duplicate"}"#)
        .with_static_tool("store_record", r#"{"success": true}"#);
    let handle = failing.clone();
    let (registry, catalog) = connect(vec![failing], InMemoryConnector::new()).await;
    let oracle = ScriptedLlmClient::replies(vec![OracleReply::calls(vec![
        ScriptedLlmClient::call("c1", "create_claim", json!({})),
        ScriptedLlmClient::call("c2", "store_record", json!({})),
    ])]);
    let report = run(&registry, &catalog, &oracle, &InjectionPolicy::default(), 10).await;

    let names: Vec<String> = handle.calls().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["create_claim".to_string()]);
    assert!(matches!(report.termination, Termination::Failed { .. }));
}

#[tokio::test]
async fn test_exhaustion_at_configured_ceiling() {
    let (registry, catalog) = connect(
        vec![InMemorySession::new("claims").with_static_tool("lookup", r#"{"success": true}"#)],
        InMemoryConnector::new(),
    )
    .await;
    let mut reply = OracleReply::calls(vec![ScriptedLlmClient::call("c", "lookup", json!({}))]);
    reply.content = Some("Still checking the policy record".into());
    let oracle = ScriptedLlmClient::repeating(reply);
    let report = run(&registry, &catalog, &oracle, &InjectionPolicy::default(), 4).await;

    assert_eq!(report.termination, Termination::Exhausted);
    assert_eq!(report.iterations, 4);
    assert_eq!(oracle.request_count(), 4);
    assert_eq!(report.invocations.len(), 4);

    let outcome = OutcomeRecorder::new("scripted").finalize(&RunSubject::new("claim.pdf", None), report);
    assert_eq!(outcome.state, TerminalState::Exhausted);
    assert_eq!(outcome.final_text.as_deref(), Some("Still checking the policy record"));
    assert!(outcome.failure_reason.is_none());
}

#[tokio::test]
async fn test_partial_connect_keeps_reachable_servers() {
    let connector = InMemoryConnector::new()
        .with_session(InMemorySession::new("alpha").with_static_tool("a_tool", "{}"))
        .with_session(InMemorySession::new("gamma").with_static_tool("g_tool", "{}"))
        .unreachable("beta");
    let mut registry = SessionRegistry::new(5);
    let report = registry
        .connect(&[sse("alpha"), sse("beta"), sse("gamma")], &connector)
        .await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(registry.server_names(), vec!["alpha".to_string(), "gamma".to_string()]);

    let catalog = ToolCatalog::new(CollisionPolicy::FirstWins);
    let snapshot = catalog.refresh(&registry, Duration::from_secs(5)).await;
    assert_eq!(snapshot.route_count(), 2);
    assert!(snapshot.all().all(|c| c.server != "beta"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_catalog_refresh_is_atomic_for_readers() {
    let small = InMemoryConnector::new().with_session(
        InMemorySession::new("one")
            .with_static_tool("t1", "{}")
            .with_static_tool("t2", "{}"),
    );
    let large = InMemoryConnector::new().with_session(
        InMemorySession::new("one")
            .with_static_tool("t1", "{}")
            .with_static_tool("t2", "{}")
            .with_static_tool("t3", "{}")
            .with_static_tool("t4", "{}")
            .with_static_tool("t5", "{}"),
    );
    let mut reg_small = SessionRegistry::new(5);
    reg_small.connect(&[sse("one")], &small).await;
    let mut reg_large = SessionRegistry::new(5);
    reg_large.connect(&[sse("one")], &large).await;
    let (reg_small, reg_large) = (Arc::new(reg_small), Arc::new(reg_large));

    let catalog = Arc::new(ToolCatalog::new(CollisionPolicy::FirstWins));
    let writer = {
        let catalog = catalog.clone();
        tokio::spawn(async move {
            for i in 0..50 {
                let reg = if i % 2 == 0 { &reg_small } else { &reg_large };
                catalog.refresh(reg, Duration::from_secs(5)).await;
                tokio::task::yield_now().await;
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let catalog = catalog.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let s = catalog.snapshot();
                    assert_eq!(s.route_count(), s.len());
                    assert!([0, 2, 5].contains(&s.len()));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for r in readers {
        r.await.unwrap();
    }
}

#[tokio::test]
async fn test_engine_rejects_document_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recipe.txt");
    std::fs::write(&path, "Pancakes: flour, eggs, milk").unwrap();

    let oracle = Arc::new(ScriptedLlmClient::replies(vec![OracleReply::text(
        "DOCUMENT_REJECTED: not an insurance claim",
    )]));
    let connector = InMemoryConnector::new()
        .with_session(InMemorySession::new("claims").with_static_tool("upload_document", "{}"));
    let store = FileOutcomeStore::new(dir.path().join("output"));
    let mut engine = Engine::new(oracle.clone(), EngineSettings::default()).with_store(store.clone());
    engine.connect(&[sse("claims")], &connector).await;

    let outcome = engine
        .process_document(&path, CancellationToken::new(), None)
        .await;
    assert_eq!(outcome.state, TerminalState::Failed);
    assert_eq!(outcome.failure_kind, Some(FailureKind::Rejected));
    assert_eq!(outcome.iterations, 1);
    assert!(outcome.artifact_id.as_deref().unwrap().starts_with("doc_"));

    let first = oracle.request(0).unwrap();
    assert!(first[1].content.contains("Pancakes"));

    let loaded = store.load(&outcome.run_id).unwrap().unwrap();
    assert_eq!(loaded.state, TerminalState::Failed);
    engine.teardown().await;
}
