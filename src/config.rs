//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DOCFLOW__*` 覆盖（双下划线表示嵌套，如 `DOCFLOW__LLM__PROVIDER=deepseek`）。
//! 服务器清单单独放在 mcp.config_path 指向的 JSON 文件中。

use std::path::PathBuf;

use serde::Deserialize;

use crate::context::InjectionRule;
use crate::tools::CollisionPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub mcp: McpSection,
    pub agent: AgentSection,
    pub injection: InjectionSection,
}

/// [app] 段：应用名、运行记录输出目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// [llm] 段：后端选择、超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [llm.retry] 段：瞬时错误的重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmRetrySection {
    /// 含首次请求的总次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    500
}

/// [mcp] 段：服务器清单位置、连接与调用超时、鉴权头、同名冲突策略
#[derive(Debug, Clone, Deserialize)]
pub struct McpSection {
    #[serde(default = "default_mcp_config_path")]
    pub config_path: PathBuf,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            config_path: default_mcp_config_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            api_key_header: default_api_key_header(),
            collision_policy: CollisionPolicy::default(),
        }
    }
}

fn default_mcp_config_path() -> PathBuf {
    PathBuf::from("mcp_config.json")
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_api_key_header() -> String {
    "X-MCP-API-KEY".to_string()
}

/// [agent] 段：循环轮数上限、文档截断长度
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_document_chars: default_max_document_chars(),
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

fn default_max_document_chars() -> usize {
    4000
}

/// [injection] 段：为空时使用内置规则
#[derive(Debug, Clone, Deserialize, Default)]
pub struct InjectionSection {
    #[serde(default)]
    pub rules: Vec<InjectionRule>,
}

/// 从 config 目录加载配置，环境变量 DOCFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DOCFLOW__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DOCFLOW")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
