//! 能力调用器
//!
//! invoke_one 在超时内调用单个能力端点，失败作为数据（InvocationResult::Failure）返回而非错误；
//! invoke_many 并发调用多个能力，结果按选择顺序收集。每次调用输出结构化审计日志（JSON）。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::tools::{sse, CapabilityDescriptor, CapabilityMethod, InvocationStyle};

/// 调用失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 传输错误、非 2xx 或流在无数据时出错
    InvocationError,
    Timeout,
    /// 缺少必填参数，未发出请求
    InvalidParameters,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvocationError => "invocation_error",
            FailureKind::Timeout => "timeout",
            FailureKind::InvalidParameters => "invalid_parameters",
        }
    }
}

/// 单次能力调用的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationResult {
    Success {
        capability: String,
        payload: Value,
    },
    Failure {
        capability: String,
        kind: FailureKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_payload: Option<Value>,
    },
}

impl InvocationResult {
    pub fn success(capability: &str, payload: Value) -> Self {
        Self::Success {
            capability: capability.to_string(),
            payload,
        }
    }

    pub fn failure(
        capability: &str,
        kind: FailureKind,
        message: impl Into<String>,
        raw_payload: Option<Value>,
    ) -> Self {
        Self::Failure {
            capability: capability.to_string(),
            kind,
            message: message.into(),
            raw_payload,
        }
    }

    pub fn capability(&self) -> &str {
        match self {
            Self::Success { capability, .. } | Self::Failure { capability, .. } => capability,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// 多能力调用的汇总；部分成功即视为成功
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvocationBatch {
    pub results: Vec<InvocationResult>,
}

impl InvocationBatch {
    pub fn single(result: InvocationResult) -> Self {
        Self {
            results: vec![result],
        }
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn is_success(&self) -> bool {
        self.success_count() > 0
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// 能力调用器：持有 HTTP 客户端与流式调用上限
#[derive(Clone)]
pub struct CapabilityInvoker {
    client: Client,
    stream_ceiling: Duration,
}

impl CapabilityInvoker {
    pub fn new(stream_ceiling_secs: u64) -> Self {
        Self::with_client(Client::new(), Duration::from_secs(stream_ceiling_secs))
    }

    pub fn with_client(client: Client, stream_ceiling: Duration) -> Self {
        Self {
            client,
            stream_ceiling,
        }
    }

    /// 调用单个能力；请求-响应风格受 `timeout` 约束，流式风格受固定上限约束
    pub async fn invoke_one(
        &self,
        descriptor: &CapabilityDescriptor,
        parameters: Map<String, Value>,
        timeout: Duration,
    ) -> InvocationResult {
        let start = Instant::now();
        let args_preview = args_preview(&parameters);
        let result = self.dispatch(descriptor, parameters, timeout).await;

        let outcome = match &result {
            InvocationResult::Success { .. } => "ok",
            InvocationResult::Failure { kind, .. } => kind.as_str(),
        };
        let audit = serde_json::json!({
            "event": "capability_audit",
            "capability": descriptor.name,
            "method": descriptor.method,
            "ok": result.is_success(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "capability");

        result
    }

    /// 并发调用多个能力；某个失败不影响其他，结果顺序与 `descriptors` 一致
    pub async fn invoke_many(
        &self,
        descriptors: &[CapabilityDescriptor],
        parameters: &HashMap<String, Map<String, Value>>,
        timeout: Duration,
    ) -> InvocationBatch {
        let calls = descriptors.iter().map(|d| {
            let params = parameters.get(&d.name).cloned().unwrap_or_default();
            self.invoke_one(d, params, timeout)
        });
        let batch = InvocationBatch {
            results: join_all(calls).await,
        };
        tracing::info!(
            requested = batch.len(),
            succeeded = batch.success_count(),
            "multi-capability invocation settled"
        );
        batch
    }

    async fn dispatch(
        &self,
        descriptor: &CapabilityDescriptor,
        parameters: Map<String, Value>,
        timeout_after: Duration,
    ) -> InvocationResult {
        let name = descriptor.name.as_str();
        let missing = descriptor.missing_required(&parameters);
        if !missing.is_empty() {
            return InvocationResult::failure(
                name,
                FailureKind::InvalidParameters,
                format!("missing required parameters: {}", missing.join(", ")),
                None,
            );
        }

        let (url, rest) = substitute_placeholders(descriptor, parameters);
        match descriptor.invocation_style() {
            InvocationStyle::RequestResponse => {
                match timeout(timeout_after, self.request(descriptor, &url, &rest)).await {
                    Ok(result) => result,
                    Err(_) => InvocationResult::failure(
                        name,
                        FailureKind::Timeout,
                        format!("no response within {}s", timeout_after.as_secs()),
                        None,
                    ),
                }
            }
            InvocationStyle::Streaming => {
                let query = query_pairs(&rest);
                match sse::subscribe(
                    &self.client,
                    &url,
                    &query,
                    descriptor.event_name(),
                    self.stream_ceiling,
                )
                .await
                {
                    Ok(payload) => InvocationResult::success(name, payload),
                    Err((kind, message)) => InvocationResult::failure(name, kind, message, None),
                }
            }
        }
    }

    async fn request(
        &self,
        descriptor: &CapabilityDescriptor,
        url: &str,
        parameters: &Map<String, Value>,
    ) -> InvocationResult {
        let name = descriptor.name.as_str();
        let builder = match descriptor.method {
            CapabilityMethod::Post => self.client.post(url).json(parameters),
            CapabilityMethod::Get | CapabilityMethod::Sse => {
                self.client.get(url).query(&query_pairs(parameters))
            }
        };

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                return InvocationResult::failure(
                    name,
                    FailureKind::InvocationError,
                    format!("transport error: {e}"),
                    None,
                )
            }
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return InvocationResult::failure(
                    name,
                    FailureKind::InvocationError,
                    format!("failed to read response body: {e}"),
                    None,
                )
            }
        };
        let payload = parse_payload(&body);

        if !status.is_success() {
            return InvocationResult::failure(
                name,
                FailureKind::InvocationError,
                format!("HTTP {status}"),
                Some(payload),
            );
        }
        InvocationResult::success(name, payload)
    }
}

/// 用参数替换端点中的 `{param}` 占位符（URL 编码），被替换的参数不再出现在 query / body 中
pub fn substitute_placeholders(
    descriptor: &CapabilityDescriptor,
    mut parameters: Map<String, Value>,
) -> (String, Map<String, Value>) {
    let mut url = descriptor.endpoint.clone();
    for name in descriptor.placeholders() {
        if let Some(value) = parameters.remove(&name) {
            let raw = scalar_string(&value);
            url = url.replace(&format!("{{{name}}}"), &urlencoding::encode(&raw));
        }
    }
    (url, parameters)
}

/// 响应体优先按 JSON 解析，否则保留原文
pub(crate) fn parse_payload(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

fn query_pairs(parameters: &Map<String, Value>) -> Vec<(String, String)> {
    parameters
        .iter()
        .map(|(k, v)| (k.clone(), scalar_string(v)))
        .collect()
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
