//! 错误恢复引擎
//!
//! 把循环内的每种故障映射为 RecoveryAction：路由 / 会话 / 传输 / 超时 / 参数错误写回 Oracle
//! 继续；业务失败与 Oracle 故障终止本次运行。

use crate::core::{AgentError, FailureKind, RecoveryAction};
use crate::llm::LlmError;
use crate::tools::DispatchResult;

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 工具调用结果 -> 动作；业务失败标记立即终止（不交给 Oracle 重试）
    pub fn handle_dispatch(&self, result: &DispatchResult) -> RecoveryAction {
        match result {
            DispatchResult::Delivered { envelope, .. } => match envelope.failure_reason() {
                Some(reason) => RecoveryAction::Abort {
                    kind: FailureKind::ApplicationFailure,
                    reason: reason.to_string(),
                },
                None => RecoveryAction::Continue,
            },
            DispatchResult::Undelivered(e) => RecoveryAction::FeedBack(e.to_string()),
        }
    }

    /// Oracle 请求失败（重试已在客户端完成）
    pub fn handle_oracle_error(&self, err: &LlmError) -> RecoveryAction {
        RecoveryAction::Abort {
            kind: FailureKind::OracleUnavailable,
            reason: format!("oracle request failed: {err}"),
        }
    }

    /// 循环之外的引擎错误
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Cancelled => RecoveryAction::Abort {
                kind: FailureKind::Cancelled,
                reason: "cancelled".to_string(),
            },
            AgentError::Extract(e) => RecoveryAction::Abort {
                kind: FailureKind::Extraction,
                reason: e.to_string(),
            },
            AgentError::LlmError(e) => self.handle_oracle_error(e),
            other => RecoveryAction::Abort {
                kind: FailureKind::ProtocolViolation,
                reason: other.to_string(),
            },
        }
    }
}
