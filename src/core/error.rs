//! 引擎错误类型、失败分类与恢复动作
//!
//! AgentError 只在编排循环之外出现（配置、连接、抽取、持久化）；循环内部的故障一律
//! 折叠为 RecoveryAction，由 RecoveryEngine 决定是写回对话还是终止本次运行。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::ExtractError;
use crate::llm::LlmError;
use crate::mcp::McpError;

/// 引擎层错误（连接、配置、抽取、持久化等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No sessions connected")]
    NoSessions,

    #[error("Cancelled")]
    Cancelled,
}

/// 运行失败的分类，写入 ProcessingOutcome 供外部监控与归档路由使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 工具调用在传输层成功，但业务载荷声明失败
    ApplicationFailure,
    /// Oracle 返回既不是最终答案也不是工具调用
    ProtocolViolation,
    /// Oracle 请求重试后仍然失败
    OracleUnavailable,
    Cancelled,
    /// 文档抽取文本失败，循环未启动
    Extraction,
    /// Oracle 判定文档不可处理并给出拒绝标记
    Rejected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ApplicationFailure => "application_failure",
            FailureKind::ProtocolViolation => "protocol_violation",
            FailureKind::OracleUnavailable => "oracle_unavailable",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Extraction => "extraction",
            FailureKind::Rejected => "rejected",
        }
    }
}

/// 恢复引擎根据故障给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 结果正常，继续处理本批次剩余调用
    Continue,
    /// 可恢复故障：错误文本已作为工具结果写回，让 Oracle 自行调整
    FeedBack(String),
    /// 终止本次运行
    Abort { kind: FailureKind, reason: String },
}
