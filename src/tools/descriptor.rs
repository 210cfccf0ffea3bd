//! 能力描述符
//!
//! 发现协议返回的 JSON 形如
//! `{name, description, endpoint_url, method: GET|POST|SSE, parameters: {..}, sse_event_name?}`；
//! 描述符一经发现即不可变，以 name 为唯一标识。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 端点路径占位符：`{param}`
fn placeholder_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// 调用方式（协议层）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityMethod {
    #[serde(rename = "GET", alias = "get")]
    Get,
    #[serde(rename = "POST", alias = "post")]
    Post,
    #[serde(rename = "SSE", alias = "sse")]
    Sse,
}

/// 调用风格：请求-响应 或 流式订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStyle {
    RequestResponse,
    Streaming,
}

/// 单个参数的描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type", default = "default_param_type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

fn default_param_type() -> String {
    "string".to_string()
}

/// 可调用外部能力（工具）的描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "endpoint_url")]
    pub endpoint: String,
    pub method: CapabilityMethod,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_event_name: Option<String>,
}

impl CapabilityDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
        method: CapabilityMethod,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            endpoint: endpoint.into(),
            method,
            parameters: BTreeMap::new(),
            sse_event_name: None,
        }
    }

    /// 追加参数描述（构建用）
    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.parameters.insert(
            name.into(),
            ParameterSpec {
                kind: kind.into(),
                description: description.into(),
                required,
            },
        );
        self
    }

    pub fn with_sse_event_name(mut self, event: impl Into<String>) -> Self {
        self.sse_event_name = Some(event.into());
        self
    }

    pub fn invocation_style(&self) -> InvocationStyle {
        match self.method {
            CapabilityMethod::Sse => InvocationStyle::Streaming,
            CapabilityMethod::Get | CapabilityMethod::Post => InvocationStyle::RequestResponse,
        }
    }

    /// SSE 监听的事件名，未配置时为 `message`
    pub fn event_name(&self) -> &str {
        self.sse_event_name.as_deref().unwrap_or("message")
    }

    /// 端点中出现的占位符名（按出现顺序）
    pub fn placeholders(&self) -> Vec<String> {
        let Some(re) = placeholder_re() else {
            return Vec::new();
        };
        re.captures_iter(&self.endpoint)
            .map(|c| c[1].to_string())
            .collect()
    }

    /// 缺失的必填参数（占位符参数同样必须提供）
    pub fn missing_required(
        &self,
        provided: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<String> {
        let mut missing: Vec<String> = self
            .parameters
            .iter()
            .filter(|(name, spec)| spec.required && !provided.contains_key(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect();
        for p in self.placeholders() {
            if !provided.contains_key(&p) && !missing.contains(&p) {
                missing.push(p);
            }
        }
        missing
    }

    /// 结构校验：名称非空、端点为 http(s) URL
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("capability name is empty".to_string());
        }
        let endpoint = self.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(format!(
                "capability '{}' has non-http endpoint '{}'",
                self.name, self.endpoint
            ));
        }
        Ok(())
    }

    /// 供路由 prompt 使用的单行摘要
    pub fn summary_line(&self) -> String {
        let params = if self.parameters.is_empty() {
            "none".to_string()
        } else {
            self.parameters
                .iter()
                .map(|(name, spec)| {
                    let req = if spec.required { ", required" } else { "" };
                    format!("{name} ({}{req}): {}", spec.kind, spec.description)
                })
                .collect::<Vec<_>>()
                .join("; ")
        };
        format!(
            "- name: {}, description: {}, parameters: {}",
            self.name, self.description, params
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_wire_shape() {
        let raw = json!({
            "name": "get_model_summary",
            "description": "Gets the summary of a model",
            "endpoint_url": "http://localhost:8080/models/{model_name}/summary",
            "method": "GET",
            "parameters": {
                "model_name": {"type": "string", "description": "model", "required": true}
            }
        });
        let d: CapabilityDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(d.method, CapabilityMethod::Get);
        assert_eq!(d.invocation_style(), InvocationStyle::RequestResponse);
        assert_eq!(d.placeholders(), vec!["model_name".to_string()]);
        assert!(d.parameters["model_name"].required);
        assert_eq!(d.event_name(), "message");
    }

    #[test]
    fn test_sse_descriptor() {
        let raw = json!({
            "name": "stream",
            "description": "",
            "endpoint_url": "http://localhost/stream",
            "method": "SSE",
            "sse_event_name": "custom_event"
        });
        let d: CapabilityDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(d.invocation_style(), InvocationStyle::Streaming);
        assert_eq!(d.event_name(), "custom_event");
    }

    #[test]
    fn test_missing_required_includes_placeholders() {
        let d = CapabilityDescriptor::new(
            "infer",
            "",
            "http://h/models/{model_name}/inference",
            CapabilityMethod::Post,
        )
        .with_parameter("input_data", "object", "payload", true);
        let provided = serde_json::Map::new();
        let missing = d.missing_required(&provided);
        assert_eq!(missing, vec!["input_data".to_string(), "model_name".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let d = CapabilityDescriptor::new("x", "", "ftp://nope", CapabilityMethod::Get);
        assert!(d.validate().is_err());
        let d = CapabilityDescriptor::new(" ", "", "http://ok", CapabilityMethod::Get);
        assert!(d.validate().is_err());
    }
}
