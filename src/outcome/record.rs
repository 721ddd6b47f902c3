//! 运行记录：ProcessingOutcome 及其组成

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::FailureKind;
use crate::memory::Message;

/// 终止状态；外部归档只看这个字段决定成功 / 异常路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Completed,
    Failed,
    Exhausted,
}

impl TerminalState {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalState::Completed)
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminalState::Completed => "COMPLETED",
            TerminalState::Failed => "FAILED",
            TerminalState::Exhausted => "EXHAUSTED",
        };
        f.write_str(s)
    }
}

/// 循环结束的方式
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Completed,
    Failed { kind: FailureKind, reason: String },
    Exhausted,
}

/// 单次工具调用的证据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// 第几轮 Reasoning（从 1 开始）
    pub step: usize,
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub server: Option<String>,
    /// Oracle 提议的参数（注入前）
    pub arguments: Value,
    /// 派发前被注入覆盖的参数名
    #[serde(default)]
    pub injected: Vec<String>,
    /// ok / app_error / routing / session / transport / timeout / arguments
    pub outcome: String,
    pub result_preview: String,
}

/// 一次文档处理的最终记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub run_id: String,
    pub document_name: String,
    #[serde(default)]
    pub artifact_id: Option<String>,
    pub state: TerminalState,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub failure_kind: Option<FailureKind>,
    pub iterations: usize,
    #[serde(default)]
    pub invocations: Vec<InvocationRecord>,
    #[serde(default)]
    pub final_text: Option<String>,
    /// 引用名 -> 服务端返回的 document_id
    #[serde(default)]
    pub tracked_documents: BTreeMap<String, String>,
    pub model: String,
    pub processed_at: DateTime<Local>,
    #[serde(default)]
    pub conversation: Vec<Message>,
}

/// 生成运行 id：`run_<时间戳>_<8 位随机>`
pub fn new_run_id() -> String {
    let ts = Local::now().format("%Y%m%d%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", ts, &suffix[..8])
}
