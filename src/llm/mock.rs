//! 脚本化 LLM 客户端（用于测试与演练，无需 API）
//!
//! 按顺序返回预置回复；脚本用完后返回 fallback（未设置则报错）。记录每次请求的会话与声明的工具名。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, OracleReply, ToolSpec};
use crate::memory::{Message, ToolCall};

pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<OracleReply, LlmError>>>,
    fallback: Option<OracleReply>,
    requests: Mutex<Vec<Vec<Message>>>,
    declared: Mutex<Vec<Vec<String>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<OracleReply, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            declared: Mutex::new(Vec::new()),
        }
    }

    /// 只含成功回复的脚本
    pub fn replies(replies: Vec<OracleReply>) -> Self {
        Self::new(replies.into_iter().map(Ok).collect())
    }

    /// 每次都返回同一回复
    pub fn repeating(reply: OracleReply) -> Self {
        Self::new(Vec::new()).with_fallback(reply)
    }

    pub fn with_fallback(mut self, reply: OracleReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// 构造一次工具调用
    pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    /// 已收到的请求数
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 第 n 次请求时的会话
    pub fn request(&self, n: usize) -> Option<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(n)
            .cloned()
    }

    /// 第 n 次请求时声明的工具名
    pub fn declared_tools(&self, n: usize) -> Option<Vec<String>> {
        self.declared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(n)
            .cloned()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<OracleReply, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        self.declared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tools.iter().map(|t| t.name.clone()).collect());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(r) => r,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Api("script exhausted".into())),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
