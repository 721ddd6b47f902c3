//! 工具结果信封
//!
//! 规范形式为 `{"ok": bool, "payload": ..., "error": ...}`。不符合规范的旧式响应统一交给
//! [`legacy`] 适配：`success: false`、非空的 `error` 字段均视为业务失败。

use serde::Serialize;
use serde_json::Value;

/// 解码后的工具结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolEnvelope {
    Ok { payload: Value },
    Err { error: String },
}

impl ToolEnvelope {
    /// 解码工具返回文本；is_error 为 MCP 结果中的 isError 标志
    pub fn decode(text: &str, is_error: bool) -> Self {
        let parsed: Option<Value> = serde_json::from_str(text.trim()).ok();

        let envelope = match parsed {
            Some(Value::Object(ref obj)) if obj.get("ok").map(Value::is_boolean).unwrap_or(false) => {
                decode_canonical(obj)
            }
            Some(value) => legacy::adapt(value),
            None => ToolEnvelope::Ok {
                payload: Value::String(text.to_string()),
            },
        };

        match envelope {
            ToolEnvelope::Ok { .. } if is_error => ToolEnvelope::Err {
                error: if text.trim().is_empty() {
                    "tool reported an error".to_string()
                } else {
                    text.trim().to_string()
                },
            },
            other => other,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ToolEnvelope::Err { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ToolEnvelope::Err { error } => Some(error),
            ToolEnvelope::Ok { .. } => None,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            ToolEnvelope::Ok { payload } => Some(payload),
            ToolEnvelope::Err { .. } => None,
        }
    }

    /// 成功载荷中的 document_id（字符串或数字）
    pub fn document_id(&self) -> Option<String> {
        match self.payload()?.get("document_id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

fn decode_canonical(obj: &serde_json::Map<String, Value>) -> ToolEnvelope {
    let ok = obj.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if ok {
        ToolEnvelope::Ok {
            payload: obj.get("payload").cloned().unwrap_or(Value::Null),
        }
    } else {
        ToolEnvelope::Err {
            error: obj
                .get("error")
                .and_then(reason_text)
                .unwrap_or_else(|| "unspecified error".to_string()),
        }
    }
}

fn reason_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o
            .get("message")
            .and_then(reason_text)
            .or_else(|| Some(v.to_string())),
        other => Some(other.to_string()),
    }
}

/// 旧式响应适配
pub mod legacy {
    use super::{reason_text, ToolEnvelope};
    use serde_json::Value;

    pub fn adapt(value: Value) -> ToolEnvelope {
        let Value::Object(obj) = &value else {
            return ToolEnvelope::Ok { payload: value };
        };

        if obj.get("success").and_then(Value::as_bool) == Some(false) {
            let error = ["error", "message", "status"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(reason_text))
                .unwrap_or_else(|| "capability reported failure".to_string());
            return ToolEnvelope::Err { error };
        }

        let success_flag = obj.get("success").and_then(Value::as_bool) == Some(true);
        if !success_flag {
            if let Some(error) = obj.get("error").and_then(reason_text) {
                return ToolEnvelope::Err { error };
            }
        }

        ToolEnvelope::Ok { payload: value }
    }
}
