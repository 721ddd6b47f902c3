//! 注入策略：派发前用上下文值覆盖 Oracle 提议的参数
//!
//! 规则表是静态配置：工具名 -> {参数名 -> InjectedValue}。可注入的值是封闭枚举，
//! 新增种类必须在 resolve 中穷尽匹配。

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{ArtifactId, PayloadContext};

/// 可注入的上下文值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectedValue {
    /// 产物字节（base64 字符串）
    ArtifactBytes,
    /// 产物文件名
    ArtifactFilename,
}

impl InjectedValue {
    fn resolve(self, ctx: &PayloadContext, id: &ArtifactId) -> Option<Value> {
        match self {
            InjectedValue::ArtifactBytes => ctx.base64_of(id).map(Value::String),
            InjectedValue::ArtifactFilename => ctx.filename_of(id).map(|s| Value::String(s.to_string())),
        }
    }
}

fn default_track() -> bool {
    true
}

/// 单个工具的注入规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionRule {
    pub tool: String,
    #[serde(default)]
    pub params: BTreeMap<String, InjectedValue>,
    /// 该工具成功结果中的 document_id 是否需要记录
    #[serde(default = "default_track")]
    pub track_document_id: bool,
}

impl InjectionRule {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: BTreeMap::new(),
            track_document_id: true,
        }
    }

    pub fn inject(mut self, param: impl Into<String>, value: InjectedValue) -> Self {
        self.params.insert(param.into(), value);
        self
    }
}

/// 内置规则：上传 / 建案类工具需要文档字节
pub fn default_rules() -> Vec<InjectionRule> {
    ["upload_document", "upload_motor_claim_document", "create_motor_claim_workflow"]
        .into_iter()
        .map(|t| InjectionRule::new(t).inject("document_base64", InjectedValue::ArtifactBytes))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct InjectionPolicy {
    rules: HashMap<String, InjectionRule>,
}

impl InjectionPolicy {
    pub fn new(rules: Vec<InjectionRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.tool.clone(), r)).collect(),
        }
    }

    /// 配置为空时使用内置规则
    pub fn from_config(rules: &[InjectionRule]) -> Self {
        if rules.is_empty() {
            Self::new(default_rules())
        } else {
            Self::new(rules.to_vec())
        }
    }

    pub fn rule(&self, tool: &str) -> Option<&InjectionRule> {
        self.rules.get(tool)
    }

    /// 需要记录 document_id 的工具名
    pub fn tracked_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .rules
            .values()
            .filter(|r| r.track_document_id)
            .map(|r| r.tool.clone())
            .collect();
        names.sort();
        names
    }

    /// 应用规则；无规则的工具原样返回。上下文值缺失时保留原参数并告警
    pub fn apply(&self, tool: &str, args: Value, ctx: &PayloadContext, artifact: &ArtifactId) -> Value {
        let Some(rule) = self.rules.get(tool) else {
            return args;
        };
        if rule.params.is_empty() {
            return args;
        }

        let mut map = match args {
            Value::Object(m) => m,
            Value::Null => serde_json::Map::new(),
            _ => {
                tracing::warn!(tool, "Arguments are not an object, injecting into a fresh one");
                serde_json::Map::new()
            }
        };

        for (param, kind) in &rule.params {
            match kind.resolve(ctx, artifact) {
                Some(value) => {
                    tracing::debug!(tool, param = %param, artifact = %artifact, "Injected context value");
                    map.insert(param.clone(), value);
                }
                None => {
                    tracing::warn!(
                        tool,
                        param = %param,
                        artifact = %artifact,
                        "Artifact not found, leaving argument as proposed"
                    );
                }
            }
        }
        Value::Object(map)
    }
}
