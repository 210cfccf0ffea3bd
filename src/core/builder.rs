//! 编排器构建器：统一的组件初始化逻辑
//!
//! 默认按配置创建 LLM、发现源、历史存储；测试与嵌入方可逐项替换（with_*）。

use std::sync::Arc;
use std::time::Duration;

use crate::a2a::DelegationTracker;
use crate::agents::GeneralAgent;
use crate::config::{AppConfig, DiscoverySourceKind};
use crate::core::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::core::ProgressSink;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{ConversationHistoryStore, InMemoryHistoryStore};
use crate::routing::{IntentRouter, Router};
use crate::tools::{
    CapabilityInvoker, CapabilityRegistry, DiscoverySource, HttpDiscovery, StaticDiscovery,
};

/// 根据配置与环境变量选择 LLM 后端；无 API Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    match (provider.as_str(), api_key) {
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        ("openai", Some(key)) => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(key.as_str()),
            ))
        }
        _ => {
            tracing::warn!("No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    router: Option<Arc<dyn Router>>,
    source: Option<Arc<dyn DiscoverySource>>,
    history: Option<Arc<dyn ConversationHistoryStore>>,
    progress: Option<ProgressSink>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            router: None,
            source: None,
            history: None,
            progress: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 替换路由器（默认基于 LLM 的 IntentRouter）
    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_discovery_source(mut self, source: Arc<dyn DiscoverySource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_history_store(mut self, store: Arc<dyn ConversationHistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 按 [discovery] 配置构建发现源
    pub fn build_discovery_source(&self) -> Arc<dyn DiscoverySource> {
        let d = &self.config.discovery;
        match d.source {
            DiscoverySourceKind::Http => {
                let source = HttpDiscovery::new(&d.base_url, &d.path);
                tracing::info!(url = source.url(), "capability discovery over http");
                Arc::new(source)
            }
            DiscoverySourceKind::Static => {
                Arc::new(StaticDiscovery::new(d.capabilities.clone()))
            }
        }
    }

    pub fn build(self) -> Orchestrator {
        let orch_cfg = &self.config.orchestrator;
        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let source = self
            .source
            .clone()
            .unwrap_or_else(|| self.build_discovery_source());
        let router = self.router.clone().unwrap_or_else(|| {
            Arc::new(IntentRouter::new(llm.clone(), orch_cfg.routing_history_turns))
        });
        let history = self.history.clone().unwrap_or_else(|| {
            Arc::new(InMemoryHistoryStore::new(
                orch_cfg.max_context_turns,
                Duration::from_secs(orch_cfg.session_ttl_secs),
            ))
        });
        let progress = self.progress.clone().unwrap_or_default();

        tracing::info!(
            source = source.name(),
            discovery_enabled = self.config.discovery.enabled,
            "building orchestrator"
        );

        Orchestrator::new(
            CapabilityRegistry::new(source, self.config.discovery.registry_options()),
            router,
            CapabilityInvoker::new(self.config.invoker.stream_ceiling_secs),
            GeneralAgent::new(llm, orch_cfg.max_context_turns),
            history,
            Arc::new(DelegationTracker::with_progress(progress.clone())),
            progress,
            OrchestratorOptions {
                request_timeout: Duration::from_secs(orch_cfg.request_timeout_secs),
                invoke_timeout: Duration::from_secs(self.config.invoker.timeout_secs),
            },
        )
    }
}
