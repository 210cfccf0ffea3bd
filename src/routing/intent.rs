//! 意图路由
//!
//! 根据可用能力与对话上下文决定由谁处理请求：通用智能体，或某个（些）能力及其参数。
//! route 从不失败：无能力可选、LLM 出错、回答无法解析、选择未知能力时一律回退到 General。
//! 回答中选中了已知能力时直接采用（能力优先于通用回答）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::llm::LlmClient;
use crate::memory::{Role, Turn};
use crate::routing::extract::{extract_json_object, Extraction};
use crate::routing::schema::{routing_answer_schema_json, RoutingAnswer};
use crate::tools::CapabilityDescriptor;

/// 一个被选中的能力及抽取出的参数
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySelection {
    pub descriptor: CapabilityDescriptor,
    pub parameters: Map<String, Value>,
}

/// 处理者
#[derive(Debug, Clone, PartialEq)]
pub enum Handler {
    /// 通用智能体直接回答
    General,
    /// 调用一个或多个能力（非空）
    Capability(Vec<CapabilitySelection>),
}

/// 路由决策
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub handler: Handler,
}

impl RoutingDecision {
    pub fn general() -> Self {
        Self {
            handler: Handler::General,
        }
    }

    pub fn capability(descriptor: CapabilityDescriptor, parameters: Map<String, Value>) -> Self {
        Self {
            handler: Handler::Capability(vec![CapabilitySelection {
                descriptor,
                parameters,
            }]),
        }
    }

    pub fn is_general(&self) -> bool {
        matches!(self.handler, Handler::General)
    }

    pub fn selections(&self) -> &[CapabilitySelection] {
        match &self.handler {
            Handler::General => &[],
            Handler::Capability(list) => list,
        }
    }

    /// 日志与 A2A 记录用的处理者名
    pub fn handler_name(&self) -> String {
        match &self.handler {
            Handler::General => "general".to_string(),
            Handler::Capability(list) => list
                .iter()
                .map(|s| s.descriptor.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// 路由器抽象；状态机只依赖此 trait，测试可注入固定决策
#[async_trait]
pub trait Router: Send + Sync {
    async fn route(
        &self,
        query: &str,
        history: &[Turn],
        capabilities: &[CapabilityDescriptor],
    ) -> RoutingDecision;
}

/// 以闭包作为路由器（测试用，不依赖 LLM）
pub struct FnRouter<F>(pub F);

#[async_trait]
impl<F> Router for FnRouter<F>
where
    F: Fn(&str, &[CapabilityDescriptor]) -> RoutingDecision + Send + Sync,
{
    async fn route(
        &self,
        query: &str,
        _history: &[Turn],
        capabilities: &[CapabilityDescriptor],
    ) -> RoutingDecision {
        if capabilities.is_empty() {
            return RoutingDecision::general();
        }
        (self.0)(query, capabilities)
    }
}

/// 基于 LLM 的意图路由器
pub struct IntentRouter {
    llm: Arc<dyn LlmClient>,
    /// 拼入 prompt 的最近历史轮数
    history_turns: usize,
}

impl IntentRouter {
    pub fn new(llm: Arc<dyn LlmClient>, history_turns: usize) -> Self {
        Self { llm, history_turns }
    }

    fn build_prompt(
        &self,
        query: &str,
        history: &[Turn],
        capabilities: &[CapabilityDescriptor],
    ) -> Vec<Turn> {
        let catalogue = capabilities
            .iter()
            .map(|c| c.summary_line())
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!(
            "You route user requests to external capabilities.\n\
             Available capabilities:\n{catalogue}\n\n\
             Pick the capability that can answer the request and extract its parameters from the request \
             and the conversation. If a capability can answer, prefer it over answering generically. \
             If several capabilities are needed, put the others in additional_tools. \
             If none applies, use \"none\".\n\
             Reply with a single JSON object matching this schema and nothing else:\n{}",
            routing_answer_schema_json()
        );

        let start = history.len().saturating_sub(self.history_turns);
        let mut turns = vec![Turn::system(system)];
        turns.extend(
            history[start..]
                .iter()
                .filter(|t| t.role != Role::System)
                .cloned(),
        );
        turns.push(Turn::user(query));
        turns
    }
}

#[async_trait]
impl Router for IntentRouter {
    async fn route(
        &self,
        query: &str,
        history: &[Turn],
        capabilities: &[CapabilityDescriptor],
    ) -> RoutingDecision {
        if capabilities.is_empty() {
            tracing::debug!("no capabilities registered, routing to general");
            return RoutingDecision::general();
        }

        let prompt = self.build_prompt(query, history, capabilities);
        match self.llm.complete(&prompt).await {
            Ok(answer) => decide(&answer, capabilities),
            Err(e) => {
                tracing::warn!(error = %e, "routing model call failed, falling back to general");
                RoutingDecision::general()
            }
        }
    }
}

/// 把模型回答转换为路由决策（纯函数）
pub fn decide(answer: &str, capabilities: &[CapabilityDescriptor]) -> RoutingDecision {
    let value = match extract_json_object(answer) {
        Extraction::Parsed { value } => value,
        Extraction::Unparseable { reason } => {
            tracing::warn!(%reason, "routing answer unparseable, falling back to general");
            return RoutingDecision::general();
        }
    };
    let parsed: RoutingAnswer = match serde_json::from_value(value) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, "routing answer has unexpected shape, falling back to general");
            return RoutingDecision::general();
        }
    };

    let find = |name: &str| capabilities.iter().find(|c| c.name == name);

    // 主选择缺失或未知时一律交给 General，附加选择不能替代主选择
    let Some(name) = parsed.primary() else {
        return RoutingDecision::general();
    };
    let Some(descriptor) = find(name) else {
        tracing::warn!(selected = %name, "routing selected unknown capability, falling back to general");
        return RoutingDecision::general();
    };
    let mut selections = vec![CapabilitySelection {
        descriptor: descriptor.clone(),
        parameters: coerce_parameters(&parsed.extracted_params),
    }];

    for extra in &parsed.additional_tools {
        let name = extra.selected_tool_name.trim();
        if selections.iter().any(|s| s.descriptor.name == name) {
            continue;
        }
        match find(name) {
            Some(descriptor) => selections.push(CapabilitySelection {
                descriptor: descriptor.clone(),
                parameters: coerce_parameters(&extra.extracted_params),
            }),
            None => tracing::debug!(selected = %name, "dropping unknown additional capability"),
        }
    }

    RoutingDecision {
        handler: Handler::Capability(selections),
    }
}

/// 参数必须是扁平对象；数组、标量等其他形状降级为空对象
pub fn coerce_parameters(raw: &Value) -> Map<String, Value> {
    match raw {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            tracing::warn!(shape = %other, "extracted parameters are not an object, using empty map");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::tools::CapabilityMethod;
    use serde_json::json;

    fn weather() -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "get_weather",
            "Current weather for a location",
            "http://localhost/weather/{location}",
            CapabilityMethod::Get,
        )
        .with_parameter("location", "string", "city name", true)
    }

    fn news() -> CapabilityDescriptor {
        CapabilityDescriptor::new("get_news", "Headlines", "http://localhost/news", CapabilityMethod::Get)
    }

    #[tokio::test]
    async fn test_no_capabilities_routes_general_without_model() {
        let llm = Arc::new(MockLlmClient::new());
        let router = IntentRouter::new(llm.clone(), 6);
        for query in ["", "What capabilities are available?"] {
            let d = router.route(query, &[], &[]).await;
            assert!(d.is_general());
        }
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_weather_in_rome() {
        let llm = Arc::new(MockLlmClient::scripted([
            "```json\n{\"selected_tool_name\": \"get_weather\", \"extracted_params\": {\"location\": \"Rome\"}}\n```",
        ]));
        let router = IntentRouter::new(llm.clone(), 6);
        let d = router
            .route("What's the weather in Rome?", &[], &[weather(), news()])
            .await;
        assert_eq!(
            d,
            RoutingDecision::capability(weather(), json!({"location": "Rome"}).as_object().cloned().unwrap())
        );

        let prompt = llm.call(0).unwrap();
        assert!(prompt[0].content.contains("get_weather"));
        assert_eq!(prompt.last().unwrap().content, "What's the weather in Rome?");
    }

    #[tokio::test]
    async fn test_prompt_includes_recent_history_only() {
        let llm = Arc::new(MockLlmClient::scripted([r#"{"selected_tool_name": "none"}"#]));
        let router = IntentRouter::new(llm.clone(), 2);
        let history = vec![
            Turn::user("old question"),
            Turn::agent("old answer"),
            Turn::user("weather in Paris?"),
            Turn::agent("Sunny."),
        ];
        router.route("and tomorrow?", &history, &[weather()]).await;
        let prompt = llm.call(0).unwrap();
        let contents: Vec<_> = prompt.iter().map(|t| t.content.as_str()).collect();
        assert!(!contents.contains(&"old question"));
        assert!(contents.contains(&"weather in Paris?"));
        assert!(contents.contains(&"Sunny."));
    }

    #[test]
    fn test_array_params_coerced_to_empty() {
        let d = decide(
            r#"{"selected_tool_name": "get_weather", "extracted_params": ["Rome"]}"#,
            &[weather()],
        );
        assert_eq!(d.selections().len(), 1);
        assert!(d.selections()[0].parameters.is_empty());
    }

    #[test]
    fn test_fallbacks_to_general() {
        let caps = [weather()];
        assert!(decide("I think you should check the weather", &caps).is_general());
        assert!(decide(r#"{"selected_tool_name": "none"}"#, &caps).is_general());
        assert!(decide(r#"{"selected_tool_name": "teleport"}"#, &caps).is_general());
        assert!(decide(r#"{"selected_tool_name": 5}"#, &caps).is_general());
    }

    #[test]
    fn test_additional_tools_need_valid_primary() {
        let caps = [weather(), news()];
        let none_primary = decide(
            r#"{"selected_tool_name": "none", "additional_tools": [{"selected_tool_name": "get_news"}]}"#,
            &caps,
        );
        assert!(none_primary.is_general());
        let unknown_primary = decide(
            r#"{"selected_tool_name": "teleport", "additional_tools": [{"selected_tool_name": "get_news"}]}"#,
            &caps,
        );
        assert!(unknown_primary.is_general());
    }

    #[test]
    fn test_additional_tools_select_many() {
        let d = decide(
            r#"{"selected_tool_name": "get_weather", "extracted_params": {"location": "Rome"},
                "additional_tools": [
                    {"selected_tool_name": "get_news"},
                    {"selected_tool_name": "unknown"},
                    {"selected_tool_name": "get_weather"}
                ]}"#,
            &[weather(), news()],
        );
        let names: Vec<_> = d.selections().iter().map(|s| s.descriptor.name.as_str()).collect();
        assert_eq!(names, vec!["get_weather", "get_news"]);
        assert_eq!(d.handler_name(), "get_weather,get_news");
    }

    #[tokio::test]
    async fn test_model_error_falls_back() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_error(LlmError::Request("down".into()));
        let router = IntentRouter::new(llm, 6);
        assert!(router.route("weather?", &[], &[weather()]).await.is_general());
    }

    #[tokio::test]
    async fn test_fn_router() {
        let router = FnRouter(|_q: &str, caps: &[CapabilityDescriptor]| {
            RoutingDecision::capability(caps[0].clone(), Map::new())
        });
        assert!(router.route("x", &[], &[]).await.is_general());
        assert!(!router.route("x", &[], &[weather()]).await.is_general());
    }
}
