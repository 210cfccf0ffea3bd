//! 编排错误类型
//!
//! 与 RecoveryEngine 配合：只有「无快照可用的发现失败」与「回复生成失败」等致命错误会终止一次运行，
//! 能力调用失败作为数据流入汇总阶段，不在此处建模。

use thiserror::Error;

use crate::core::Phase;

/// 能力发现失败（来源不可达 / 数据不合法 / 超时）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("discovery source unreachable: {0}")]
    Unreachable(String),

    #[error("discovery returned malformed data: {0}")]
    Malformed(String),

    #[error("discovery timed out after {0}s")]
    Timeout(u64),

    /// 后台刷新任务异常退出（panic / 运行时关闭）
    #[error("discovery task aborted: {0}")]
    Aborted(String),
}

/// 一次编排运行中的致命错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("capability discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("response generation failed: {0}")]
    Summarization(String),

    #[error("request deadline exceeded during {stage} ({budget_secs}s budget)")]
    DeadlineExceeded { stage: String, budget_secs: u64 },

    #[error("request cancelled")]
    Cancelled,

    #[error("illegal phase transition {from:?} -> {to:?}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 以一条用户可读的致歉消息结束本次运行
    Apologize(String),
    /// 用户主动取消；消息与 Apologize 一样写入历史并作为回复返回
    Abort(String),
}
