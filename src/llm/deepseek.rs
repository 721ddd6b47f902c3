//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat（支持函数调用）

use crate::llm::OpenAiClient;

/// DeepSeek API 常量
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek 客户端
///
/// 优先使用环境变量 `DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`；model 为 None 时用 deepseek-chat
pub fn create_deepseek_client(model: Option<&str>, timeout_secs: u64) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    OpenAiClient::new(
        Some(DEEPSEEK_BASE_URL),
        model.unwrap_or(DEEPSEEK_CHAT),
        api_key.as_deref(),
        timeout_secs,
    )
}
