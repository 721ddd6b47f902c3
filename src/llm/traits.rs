//! LLM 客户端抽象（Oracle）
//!
//! 给定会话与能力声明，返回文本答案或一组工具调用。RetryingLlmClient 对瞬时错误做有限重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Message, ToolCall};

/// 向 Oracle 声明的函数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Oracle 的结束信号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishSignal {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Other(String),
}

/// Oracle 的一次回复
#[derive(Debug, Clone, PartialEq)]
pub struct OracleReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish: FinishSignal,
}

impl OracleReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish: FinishSignal::Stop,
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            finish: FinishSignal::ToolCalls,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Empty response")]
    EmptyResponse,
}

impl LlmError {
    /// 可重试的错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout(_) | LlmError::RateLimited { .. } | LlmError::Transport(_)
        )
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 以会话与能力声明请求一次回复（tool_choice = auto）
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<OracleReply, LlmError>;

    /// 模型名（写入运行记录）
    fn model(&self) -> &str;

    /// 累计 token 使用：(prompt, completion, total)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<OracleReply, LlmError> {
        (**self).complete(messages, tools).await
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        (**self).token_usage()
    }
}

/// 重试配置：最多 max_attempts 次（含首次），第 n 次重试前等待 n * backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

pub struct RetryingLlmClient<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: LlmClient> RetryingLlmClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingLlmClient<C> {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<OracleReply, LlmError> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.complete(messages, tools).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let wait = match &e {
                        LlmError::RateLimited { retry_after_ms } if *retry_after_ms > 0 => {
                            Duration::from_millis(*retry_after_ms)
                        }
                        _ => self.config.backoff * attempt,
                    };
                    tracing::warn!(attempt, error = %e, wait_ms = wait.as_millis() as u64, "LLM request failed, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
