//! 错误恢复引擎
//!
//! 把致命的 OrchestratorError 映射为 RecoveryAction：用户取消为 Abort，其余为 Apologize，两者都带一条消息。
//! 消息格式固定为 `A problem occurred: {error}`，同时作为 agent 轮次写入历史供诊断回放。

use crate::core::{OrchestratorError, RecoveryAction};

/// 面向用户的错误消息前缀
pub const APOLOGY_PREFIX: &str = "A problem occurred";

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &OrchestratorError) -> RecoveryAction {
        match err {
            OrchestratorError::Cancelled => RecoveryAction::Abort(apology(err)),
            _ => RecoveryAction::Apologize(apology(err)),
        }
    }
}

impl RecoveryAction {
    /// 写入历史与返回给调用方的消息
    pub fn message(&self) -> &str {
        match self {
            RecoveryAction::Apologize(msg) | RecoveryAction::Abort(msg) => msg,
        }
    }
}

fn apology(err: &OrchestratorError) -> String {
    format!("{APOLOGY_PREFIX}: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DiscoveryError;

    #[test]
    fn test_discovery_error_apologizes() {
        let engine = RecoveryEngine::new();
        let err = OrchestratorError::Discovery(DiscoveryError::Unreachable("refused".into()));
        match engine.handle(&err) {
            RecoveryAction::Apologize(msg) => {
                assert_eq!(
                    msg,
                    "A problem occurred: capability discovery failed: discovery source unreachable: refused"
                );
            }
            other => panic!("expected Apologize, got {other:?}"),
        }
    }

    #[test]
    fn test_summarization_error_apologizes() {
        let engine = RecoveryEngine::new();
        let err = OrchestratorError::Summarization("empty response".into());
        let action = engine.handle(&err);
        assert!(action.message().starts_with(APOLOGY_PREFIX));
        assert!(action.message().contains("empty response"));
    }

    #[test]
    fn test_cancelled_aborts() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&OrchestratorError::Cancelled);
        assert!(matches!(action, RecoveryAction::Abort(_)));
        assert_eq!(action.message(), "A problem occurred: request cancelled");
    }
}
