//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__DISCOVERY__ENABLED=false`）。
//! LLM 的 API Key 不写入配置文件，只从 `OPENAI_API_KEY` 读取。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::tools::{CapabilityDescriptor, RegistryOptions};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub discovery: DiscoverySection,
    pub invoker: InvokerSection,
    pub orchestrator: OrchestratorSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / mock；openai 但未设置 OPENAI_API_KEY 时退回 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

/// 发现源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySourceKind {
    #[default]
    Http,
    Static,
}

/// [discovery] 段：能力发现
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub source: DiscoverySourceKind,
    /// 能力服务地址，发现端点为 base_url + path
    #[serde(default = "default_discovery_base_url")]
    pub base_url: String,
    #[serde(default = "default_discovery_path")]
    pub path: String,
    /// 快照有效期（秒）
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// 单次发现超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// source = "static" 时使用的能力列表
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
}

fn default_true() -> bool {
    true
}

fn default_discovery_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_discovery_path() -> String {
    "/tools".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: true,
            source: DiscoverySourceKind::Http,
            base_url: default_discovery_base_url(),
            path: default_discovery_path(),
            ttl_secs: default_ttl_secs(),
            timeout_secs: default_timeout_secs(),
            capabilities: Vec::new(),
        }
    }
}

impl DiscoverySection {
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            enabled: self.enabled,
            ttl: Duration::from_secs(self.ttl_secs),
            fetch_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// [invoker] 段：能力调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct InvokerSection {
    /// 请求-响应调用超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 流式调用的固定上限（秒）
    #[serde(default = "default_timeout_secs")]
    pub stream_ceiling_secs: u64,
}

impl Default for InvokerSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            stream_ceiling_secs: default_timeout_secs(),
        }
    }
}

/// [orchestrator] 段：单次请求预算与会话历史
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 单次请求总预算（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 会话历史保留轮数（每轮 user + agent）
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
    /// 路由 prompt 中带入的最近历史条数
    #[serde(default = "default_routing_history_turns")]
    pub routing_history_turns: usize,
    /// 会话空闲过期（秒）
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_context_turns() -> usize {
    20
}

fn default_routing_history_turns() -> usize {
    6
}

fn default_session_ttl_secs() -> u64 {
    3600
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_context_turns: default_max_context_turns(),
            routing_history_turns: default_routing_history_turns(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
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
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 加载配置，失败时记录警告并使用默认值
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    })
}
