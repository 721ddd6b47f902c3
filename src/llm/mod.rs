//! LLM 层：Oracle 抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{
    FinishSignal, LlmClient, LlmError, OracleReply, RetryConfig, RetryingLlmClient, ToolSpec,
};

use crate::config::LlmSection;

/// 根据 [llm] 配置创建带重试的客户端：provider = deepseek 走 DeepSeek 端点，其余按 OpenAI 兼容处理
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let retry = RetryConfig {
        max_attempts: cfg.retry.max_attempts,
        backoff: Duration::from_millis(cfg.retry.backoff_ms),
    };
    let timeout = cfg.timeouts.request;

    match cfg.provider.to_lowercase().as_str() {
        "deepseek" => {
            tracing::info!("Using DeepSeek LLM ({})", cfg.model);
            Arc::new(RetryingLlmClient::new(
                create_deepseek_client(Some(&cfg.model), timeout),
                retry,
            ))
        }
        other => {
            if other != "openai" {
                tracing::warn!(provider = other, "Unknown LLM provider, treating as OpenAI compatible");
            }
            tracing::info!("Using OpenAI LLM ({})", cfg.model);
            Arc::new(RetryingLlmClient::new(
                OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, None, timeout),
                retry,
            ))
        }
    }
}
