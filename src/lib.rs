//! docflow - 多 MCP 服务器工具路由与文档编排引擎
//!
//! 模块划分：
//! - **agent**: 无头引擎（connect -> refresh -> process_document -> teardown）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 待注入产物与注入策略
//! - **core**: 错误类型、失败分类、恢复策略
//! - **extract**: 文档转文本接口
//! - **llm**: Oracle 抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化）
//! - **mcp**: 服务器描述符、JSON-RPC 协议、HTTP/SSE 会话与注册表
//! - **memory**: 对话消息
//! - **outcome**: 运行记录、摘要与持久化
//! - **react**: 初始提示词与编排主循环
//! - **tools**: 能力目录 / 路由、结果信封、派发器

pub mod agent;
pub mod config;
pub mod context;
pub mod core;
pub mod extract;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod observability;
pub mod outcome;
pub mod react;
pub mod tools;

pub use agent::{Engine, EngineSettings};
