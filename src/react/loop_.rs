//! 编排主循环
//!
//! Reasoning -> (Acting -> Reasoning)* -> 终止。每轮把目录当前快照声明给 Oracle，回复原样追加到会话；
//! 有工具调用时按顺序逐个执行（解析参数 -> 注入 -> 派发 -> 写回 tool 消息）。
//! 业务失败立即终止；路由 / 会话 / 传输 / 超时 / 参数错误写回会话由 Oracle 自行调整。
//! 可选 event_tx：向 CLI 推送 StepUpdate / ToolCall / Observation / Finished。

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::context::{ArtifactId, InjectionPolicy, PayloadContext};
use crate::core::{FailureKind, RecoveryAction, RecoveryEngine};
use crate::llm::{FinishSignal, LlmClient, OracleReply};
use crate::memory::{Conversation, Message, ToolCall};
use crate::outcome::{InvocationRecord, TerminalState, Termination};
use crate::react::RunEvent;
use crate::tools::{ArtifactTracker, DispatchError, DispatchResult, Dispatcher};

/// 默认最大 Reasoning 轮数
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
/// Observation / 记录预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 思考内容展示最大字符数
const THINKING_PREVIEW_CHARS: usize = 800;

/// 循环结束时的完整报告，交给 OutcomeRecorder 整形
#[derive(Debug)]
pub struct LoopReport {
    pub conversation: Conversation,
    pub termination: Termination,
    /// Oracle 被调用的次数
    pub iterations: usize,
    pub invocations: Vec<InvocationRecord>,
    pub tracked: ArtifactTracker,
}

/// 一次运行所需的协作者
pub struct RunSession<'a> {
    /// Oracle（必需）
    pub oracle: &'a dyn LlmClient,
    /// 工具派发器（必需）
    pub dispatcher: &'a Dispatcher<'a>,
    /// 注入策略（必需）
    pub injection: &'a InjectionPolicy,
    /// 待注入产物（必需）
    pub payload: &'a PayloadContext,
    pub artifact: &'a ArtifactId,
    pub recovery: RecoveryEngine,
    pub cancel_token: CancellationToken,
    pub max_iterations: usize,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a UnboundedSender<RunEvent>>,
}

impl<'a> RunSession<'a> {
    pub fn new(
        oracle: &'a dyn LlmClient,
        dispatcher: &'a Dispatcher<'a>,
        injection: &'a InjectionPolicy,
        payload: &'a PayloadContext,
        artifact: &'a ArtifactId,
    ) -> Self {
        Self {
            oracle,
            dispatcher,
            injection,
            payload,
            artifact,
            recovery: RecoveryEngine::new(),
            cancel_token: CancellationToken::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            event_tx: None,
        }
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, ev: RunEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 追踪到 document_id 时附加给 Oracle 的提示
fn note_tracked(text: &str, document_id: &str) -> String {
    let note = format!(
        "Document uploaded successfully. Use document_id={document_id} in subsequent workflow creation calls."
    );
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut map)) => {
            map.insert("_note_for_llm".to_string(), Value::String(note));
            Value::Object(map).to_string()
        }
        _ => format!("{text}\n\n{note}"),
    }
}

/// 单次工具调用的处理结果
enum CallStep {
    Continue,
    Stop(Termination),
}

/// 执行编排循环直至终止；所有故障都折叠进 LoopReport，不返回错误
pub async fn run_document_loop(session: &RunSession<'_>, initial: Vec<Message>) -> LoopReport {
    let mut conversation = Conversation::from_messages(initial);
    let mut invocations = Vec::new();
    let mut iterations = 0usize;

    let termination = 'outer: loop {
        if session.cancel_token.is_cancelled() {
            break Termination::Failed {
                kind: FailureKind::Cancelled,
                reason: "cancelled".to_string(),
            };
        }
        if iterations >= session.max_iterations {
            tracing::warn!(max = session.max_iterations, "Iteration budget exhausted");
            break Termination::Exhausted;
        }

        iterations += 1;
        session.emit(RunEvent::StepUpdate {
            step: iterations,
            max_steps: session.max_iterations,
        });

        // 每轮取最新快照：刷新只在轮与轮之间生效
        let specs = session.dispatcher.catalog().snapshot().tool_specs();
        let reply: OracleReply = tokio::select! {
            _ = session.cancel_token.cancelled() => {
                break 'outer Termination::Failed {
                    kind: FailureKind::Cancelled,
                    reason: "cancelled".to_string(),
                };
            }
            r = session.oracle.complete(conversation.messages(), &specs) => match r {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(error = %e, step = iterations, "Oracle request failed");
                    session.emit(RunEvent::Error { text: e.to_string() });
                    match session.recovery.handle_oracle_error(&e) {
                        RecoveryAction::Abort { kind, reason } => break 'outer Termination::Failed { kind, reason },
                        _ => continue 'outer,
                    }
                }
            }
        };

        if let Some(text) = reply.content.as_deref().filter(|t| !t.trim().is_empty()) {
            session.emit(RunEvent::ThinkingContent {
                text: preview(text, THINKING_PREVIEW_CHARS),
            });
        }

        if reply.tool_calls.is_empty() {
            let finish = reply.finish.clone();
            conversation.push(Message::assistant(reply.content.unwrap_or_default()));
            match finish {
                FinishSignal::Stop => break Termination::Completed,
                other => {
                    tracing::warn!(signal = ?other, "Oracle stopped without tool calls");
                    break Termination::Failed {
                        kind: FailureKind::ProtocolViolation,
                        reason: format!("unexpected oracle signal: {other:?}"),
                    };
                }
            }
        }

        tracing::info!(step = iterations, calls = reply.tool_calls.len(), "Oracle requested tool calls");
        let calls = reply.tool_calls.clone();
        conversation.push(Message::assistant_with_calls(reply.content, reply.tool_calls));

        for call in &calls {
            if session.cancel_token.is_cancelled() {
                break 'outer Termination::Failed {
                    kind: FailureKind::Cancelled,
                    reason: "cancelled".to_string(),
                };
            }
            match execute_call(session, call, iterations, &mut conversation, &mut invocations).await {
                CallStep::Continue => {}
                CallStep::Stop(t) => break 'outer t,
            }
        }
    };

    let state = match &termination {
        Termination::Completed => TerminalState::Completed,
        Termination::Failed { .. } => TerminalState::Failed,
        Termination::Exhausted => TerminalState::Exhausted,
    };
    session.emit(RunEvent::Finished { state, iterations });

    LoopReport {
        conversation,
        termination,
        iterations,
        invocations,
        tracked: session.dispatcher.tracked_documents(),
    }
}

async fn execute_call(
    session: &RunSession<'_>,
    call: &ToolCall,
    step: usize,
    conversation: &mut Conversation,
    invocations: &mut Vec<InvocationRecord>,
) -> CallStep {
    let proposed = match serde_json::from_str::<Value>(&call.arguments) {
        Ok(v) => v,
        Err(e) if call.arguments.trim().is_empty() => {
            tracing::debug!(tool = %call.name, error = %e, "Empty arguments, using {{}}");
            Value::Object(Default::default())
        }
        Err(e) => {
            let err = DispatchError::InvalidArguments {
                tool: call.name.clone(),
                message: e.to_string(),
            };
            tracing::warn!(tool = %call.name, error = %err, "Unparseable tool arguments");
            let result = DispatchResult::Undelivered(err);
            record(call, step, Value::String(call.arguments.clone()), Vec::new(), &result, invocations);
            conversation.push(Message::tool(&call.id, &call.name, result.text()));
            return CallStep::Continue;
        }
    };

    session.emit(RunEvent::ToolCall {
        tool: call.name.clone(),
        args: proposed.clone(),
    });

    let injected: Vec<String> = session
        .injection
        .rule(&call.name)
        .map(|r| r.params.keys().cloned().collect())
        .unwrap_or_default();
    let effective = session
        .injection
        .apply(&call.name, proposed.clone(), session.payload, session.artifact);

    let result = session.dispatcher.invoke(&call.name, effective).await;

    let mut text = result.text();
    if let DispatchResult::Delivered {
        tracked_document_id: Some(id),
        ..
    } = &result
    {
        let reference = proposed
            .get("document_name")
            .and_then(Value::as_str)
            .unwrap_or(crate::tools::executor::UNKNOWN_REFERENCE)
            .to_string();
        session.emit(RunEvent::DocumentTracked {
            reference,
            document_id: id.clone(),
        });
        text = note_tracked(&text, id);
    }

    session.emit(RunEvent::Observation {
        tool: call.name.clone(),
        outcome: result.outcome().to_string(),
        preview: preview(&text, OBSERVATION_PREVIEW_CHARS),
    });
    record(call, step, proposed, injected, &result, invocations);
    conversation.push(Message::tool(&call.id, &call.name, text));

    match session.recovery.handle_dispatch(&result) {
        RecoveryAction::Continue => CallStep::Continue,
        RecoveryAction::FeedBack(reason) => {
            tracing::info!(tool = %call.name, reason = %reason, "Tool error fed back to oracle");
            CallStep::Continue
        }
        RecoveryAction::Abort { kind, reason } => {
            tracing::warn!(tool = %call.name, reason = %reason, "Tool reported failure, stopping run");
            CallStep::Stop(Termination::Failed { kind, reason })
        }
    }
}

fn record(
    call: &ToolCall,
    step: usize,
    arguments: Value,
    injected: Vec<String>,
    result: &DispatchResult,
    invocations: &mut Vec<InvocationRecord>,
) {
    invocations.push(InvocationRecord {
        step,
        call_id: call.id.clone(),
        tool: call.name.clone(),
        server: result.server().map(str::to_string),
        arguments,
        injected,
        outcome: result.outcome().to_string(),
        result_preview: preview(&result.text(), OBSERVATION_PREVIEW_CHARS),
    });
}
