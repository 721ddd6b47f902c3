//! 记忆层：一次运行内只追加的对话

pub mod conversation;

pub use conversation::{Conversation, Message, Role, ToolCall};
