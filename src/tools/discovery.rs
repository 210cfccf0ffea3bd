//! 能力发现源
//!
//! 注册表只依赖「拉取一组 CapabilityDescriptor」这一抽象；
//! HTTP 描述符列表与静态配置是两种实现。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::core::DiscoveryError;
use crate::tools::CapabilityDescriptor;

/// 发现源 trait
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// 来源标识（日志用）
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<CapabilityDescriptor>, DiscoveryError>;
}

/// HTTP 描述符列表：GET `{base_url}{path}`，响应为描述符数组或 `{"tools": [...]}`
pub struct HttpDiscovery {
    client: Client,
    url: String,
}

impl HttpDiscovery {
    pub fn new(base_url: &str, path: &str) -> Self {
        Self::with_client(Client::new(), base_url, path)
    }

    pub fn with_client(client: Client, base_url: &str, path: &str) -> Self {
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// 解析发现响应体；任何一项不合法都视为整批不合法
pub fn parse_descriptor_list(body: Value) -> Result<Vec<CapabilityDescriptor>, DiscoveryError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("tools") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(DiscoveryError::Malformed(
                    "expected a descriptor array or an object with a 'tools' array".to_string(),
                ))
            }
        },
        other => {
            return Err(DiscoveryError::Malformed(format!(
                "expected a descriptor array, got {}",
                json_kind(&other)
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<CapabilityDescriptor>(item)
                .map_err(|e| DiscoveryError::Malformed(format!("descriptor #{i}: {e}")))
        })
        .collect()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl DiscoverySource for HttpDiscovery {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<CapabilityDescriptor>, DiscoveryError> {
        tracing::info!(url = %self.url, "fetching capability descriptors");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Unreachable(format!(
                "discovery endpoint returned HTTP {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        parse_descriptor_list(body)
    }
}

/// 静态配置来源（config 中的 [[discovery.capabilities]]）
pub struct StaticDiscovery {
    descriptors: Vec<CapabilityDescriptor>,
}

impl StaticDiscovery {
    pub fn new(descriptors: Vec<CapabilityDescriptor>) -> Self {
        Self { descriptors }
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self) -> Result<Vec<CapabilityDescriptor>, DiscoveryError> {
        Ok(self.descriptors.clone())
    }
}
