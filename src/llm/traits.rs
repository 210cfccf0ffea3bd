//! LLM 客户端抽象
//!
//! 编排引擎把自然语言生成视为不透明能力：给定一组轮次，返回一段文本。
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Turn;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, turns: &[Turn]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
