//! 初始提示词构建（纯函数）
//!
//! 系统指令包含工具使用策略与文档有效性闸门：文本不像可处理的理赔文档时，Oracle 须直接以
//! REJECTION_MARKER 开头作答且不调用任何工具。用户消息携带抽取文本，按字符数截断并附截断标记。

use crate::memory::Message;

/// 文档被拒绝时最终答案的开头
pub const REJECTION_MARKER: &str = "DOCUMENT_REJECTED";
pub const TRUNCATION_MARKER: &str = "... (document truncated)";

const SYSTEM_PROMPT: &str = "You are an intelligent claims processing agent with access to MCP tools for processing insurance claims.

Your task is to:
1. Analyze the claim document text provided
2. Use the appropriate tools to understand the claim type and extract relevant information
3. Upload the claim document as needed
4. Based on the claim type (motor or healthcare), create the appropriate workflow
   IMPORTANT: Pass the document_id from the upload response to the workflow creation tool
5. Store the claim record
6. Provide a summary of what you did

Document content is attached to upload calls automatically; pass any placeholder for document_base64.
If a tool reports a failure, do not retry it; explain what happened.

Validity gate: if the supplied text is not plausibly an insurance claim document (empty, unreadable, or unrelated content), do not call any tool. Reply immediately with a single line starting with DOCUMENT_REJECTED followed by a short reason.";

/// 初始会话的两条消息
#[derive(Debug, Clone)]
pub struct InitialPrompt {
    pub system: Message,
    pub user: Message,
    /// 文本是否被截断
    pub truncated: bool,
}

impl InitialPrompt {
    pub fn into_messages(self) -> Vec<Message> {
        vec![self.system, self.user]
    }
}

/// 按字符数截断；超出时返回 (前 max_chars 个字符, true)
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

pub fn build_initial_prompt(document_text: &str, max_chars: usize) -> InitialPrompt {
    let (body, truncated) = truncate_chars(document_text, max_chars);
    let marker = if truncated {
        format!("\n{TRUNCATION_MARKER}")
    } else {
        String::new()
    };

    let user = format!(
        "Please process this insurance claim document. Here is the extracted text:

--- CLAIM DOCUMENT START ---
{body}{marker}
--- CLAIM DOCUMENT END ---

Please analyze this claim and use the available MCP tools to:
1. Extract the claim information and determine its type
2. Upload the claim document
3. Create the appropriate workflow
4. Store the claim record
5. Provide me with a summary of the processing results"
    );

    InitialPrompt {
        system: Message::system(SYSTEM_PROMPT),
        user: Message::user(user),
        truncated,
    }
}

/// 最终答案是否为拒绝
pub fn is_rejection(final_text: &str) -> bool {
    final_text.trim_start().starts_with(REJECTION_MARKER)
}
