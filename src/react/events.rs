//! 编排过程事件：供 CLI / 前端实时展示 Oracle 回复与工具调用

use serde::Serialize;

use crate::outcome::TerminalState;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// 进入第几轮 Reasoning
    StepUpdate { step: usize, max_steps: usize },
    /// Oracle 的文本内容（预览）
    ThinkingContent { text: String },
    /// 调用工具（参数为注入前的提议值）
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        tool: String,
        outcome: String,
        preview: String,
    },
    /// 记录到产物 id
    DocumentTracked { reference: String, document_id: String },
    /// 运行结束
    Finished {
        state: TerminalState,
        iterations: usize,
    },
    /// 错误
    Error { text: String },
}
