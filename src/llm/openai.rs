//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；携带函数声明并以
//! tool_choice = auto 请求，回复中的 tool_calls 与 finish_reason 原样映射为 OracleReply。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolChoiceOption,
    ChatCompletionTools, CreateChatCompletionRequestArgs, FinishReason, FunctionCall,
    FunctionObject, ToolChoiceOptions,
};
use async_openai::Client;
use async_trait::async_trait;
use tokio::time::timeout;

use crate::llm::{FinishSignal, LlmClient, LlmError, OracleReply, ToolSpec};
use crate::memory::{Message, Role, ToolCall};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与单次请求超时
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    /// api_key 为 None 时回退到环境变量 OPENAI_API_KEY；都没有时告警并以占位值继续
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| {
                tracing::warn!("No LLM API key set, requests will be unauthenticated");
                "sk-placeholder".to_string()
            });

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages.iter().map(to_openai_message).collect()
    }
}

fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let msg = match m.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid)?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid)?,
        ),
        Role::Assistant => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            if !m.content.is_empty() || m.tool_calls.is_empty() {
                args.content(m.content.clone());
            }
            if !m.tool_calls.is_empty() {
                args.tool_calls(
                    m.tool_calls
                        .iter()
                        .map(|tc| {
                            ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                                id: tc.id.clone(),
                                function: FunctionCall {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                        })
                        .collect::<Vec<_>>(),
                );
            }
            ChatCompletionRequestMessage::Assistant(args.build().map_err(invalid)?)
        }
        Role::Tool => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .content(m.content.clone())
                .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                .build()
                .map_err(invalid)?,
        ),
    };
    Ok(msg)
}

fn to_openai_tools(tools: &[ToolSpec]) -> Vec<ChatCompletionTools> {
    tools
        .iter()
        .map(|t| {
            ChatCompletionTools::Function(ChatCompletionTool {
                function: FunctionObject {
                    name: t.name.clone(),
                    description: (!t.description.is_empty()).then(|| t.description.clone()),
                    parameters: Some(t.parameters.clone()),
                    strict: None,
                },
            })
        })
        .collect()
}

fn invalid(e: OpenAIError) -> LlmError {
    LlmError::InvalidRequest(e.to_string())
}

fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::Reqwest(err) => {
            if err.status().map(|s| s.as_u16() == 429).unwrap_or(false) {
                LlmError::RateLimited { retry_after_ms: 0 }
            } else if err.status().map(|s| s.is_server_error()).unwrap_or(false) || err.is_timeout() || err.is_connect() {
                LlmError::Transport(err.to_string())
            } else {
                LlmError::Api(err.to_string())
            }
        }
        OpenAIError::ApiError(api) => {
            let rate_limited = api
                .code
                .as_deref()
                .or(api.r#type.as_deref())
                .map(|c| c.contains("rate_limit"))
                .unwrap_or(false);
            if rate_limited {
                LlmError::RateLimited { retry_after_ms: 0 }
            } else {
                LlmError::Api(api.to_string())
            }
        }
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg),
        other => LlmError::Api(other.to_string()),
    }
}

fn map_finish(reason: Option<FinishReason>) -> FinishSignal {
    match reason {
        Some(FinishReason::Stop) => FinishSignal::Stop,
        Some(FinishReason::ToolCalls) => FinishSignal::ToolCalls,
        Some(FinishReason::Length) => FinishSignal::Length,
        Some(FinishReason::ContentFilter) => FinishSignal::ContentFilter,
        Some(FinishReason::FunctionCall) => FinishSignal::Other("function_call".into()),
        None => FinishSignal::Other("none".into()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<OracleReply, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(self.to_openai_messages(messages)?);
        if !tools.is_empty() {
            args.tools(to_openai_tools(tools))
                .tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto));
        }
        let request = args.build().map_err(invalid)?;

        let response = timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(map_openai_error)?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let choice = response.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| match tc {
                ChatCompletionMessageToolCalls::Function(f) => Some(ToolCall {
                    id: f.id,
                    name: f.function.name,
                    arguments: f.function.arguments,
                }),
                ChatCompletionMessageToolCalls::Custom(c) => {
                    tracing::warn!(id = %c.id, "Ignoring custom tool call");
                    None
                }
            })
            .collect();

        Ok(OracleReply {
            content: choice.message.content,
            tool_calls,
            finish: map_finish(choice.finish_reason),
        })
    }
}
