//! 通用智能体
//!
//! 两种用法：没有合适能力时直接回答用户；能力调用结束后把原始结果（含失败）汇总成自然语言回复。

use std::sync::Arc;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Role, Turn};
use crate::tools::{InvocationBatch, InvocationResult};

const ANSWER_PROMPT: &str = "You are a helpful assistant. No external capability was selected for \
this request, so answer it directly and concisely using the conversation so far. \
If the user asks what you can do, say which kinds of requests you can route to external capabilities.";

const SUMMARY_PROMPT: &str = "You are a helpful assistant. External capabilities were called to answer \
the user's request. Turn their results into a clear natural-language answer. Do not show raw JSON. \
If a capability failed, explain briefly what went wrong and what the user can try instead.";

/// 单个结果在 prompt 中的最大字符数
const PAYLOAD_PREVIEW_CHARS: usize = 4000;

/// 通用智能体：持有 LLM 与上下文轮数上限
pub struct GeneralAgent {
    llm: Arc<dyn LlmClient>,
    max_context_turns: usize,
}

impl GeneralAgent {
    pub fn new(llm: Arc<dyn LlmClient>, max_context_turns: usize) -> Self {
        Self {
            llm,
            max_context_turns,
        }
    }

    /// 直接回答；`history` 末尾应为本次用户消息
    pub async fn answer(&self, history: &[Turn]) -> Result<String, LlmError> {
        let mut turns = vec![Turn::system(ANSWER_PROMPT)];
        turns.extend(self.context(history));
        self.complete(&turns).await
    }

    /// 汇总能力调用结果（全部失败时解释失败原因）
    pub async fn summarize(
        &self,
        query: &str,
        history: &[Turn],
        batch: &InvocationBatch,
    ) -> Result<String, LlmError> {
        let mut turns = vec![Turn::system(SUMMARY_PROMPT)];
        turns.extend(self.context(history));
        turns.push(Turn::system(render_results(query, batch)));
        self.complete(&turns).await
    }

    fn context(&self, history: &[Turn]) -> Vec<Turn> {
        let keep = self.max_context_turns.saturating_mul(2).max(1);
        let start = history.len().saturating_sub(keep);
        history[start..]
            .iter()
            .filter(|t| t.role != Role::System)
            .cloned()
            .collect()
    }

    async fn complete(&self, turns: &[Turn]) -> Result<String, LlmError> {
        let text = self.llm.complete(turns).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

/// 把调用结果渲染为汇总 prompt 的一部分
pub fn render_results(query: &str, batch: &InvocationBatch) -> String {
    let mut out = format!(
        "User request: {query}\nCapability results ({} of {} succeeded):\n",
        batch.success_count(),
        batch.len()
    );
    for result in &batch.results {
        match result {
            InvocationResult::Success {
                capability,
                payload,
            } => {
                out.push_str(&format!(
                    "- {capability}: OK\n{}\n",
                    preview(&payload_text(payload))
                ));
            }
            InvocationResult::Failure {
                capability,
                kind,
                message,
                raw_payload,
            } => {
                out.push_str(&format!("- {capability}: FAILED ({}) {message}\n", kind.as_str()));
                if let Some(raw) = raw_payload {
                    out.push_str(&format!("{}\n", preview(&payload_text(raw))));
                }
            }
        }
    }
    out
}

fn payload_text(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > PAYLOAD_PREVIEW_CHARS {
        format!(
            "{}...",
            text.chars().take(PAYLOAD_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        text.to_string()
    }
}
