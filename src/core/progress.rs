//! 进度事件旁路通道
//!
//! 阶段开始 / 完成与子步骤消息通过 broadcast 发给任意数量的订阅者（UI、日志等），按 session_id 区分。
//! 纯观测用途：没有订阅者时发送失败被忽略，状态机的任何转换都不依赖事件被消费。

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::Phase;

/// 进度事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    PhaseStarted {
        session_id: String,
        phase: Phase,
    },
    PhaseCompleted {
        session_id: String,
        phase: Phase,
        success: bool,
    },
    /// 阶段内的子步骤（如 A2A 委派记录）
    Substep {
        session_id: String,
        message: String,
    },
}

impl ProgressEvent {
    pub fn session_id(&self) -> &str {
        match self {
            ProgressEvent::PhaseStarted { session_id, .. }
            | ProgressEvent::PhaseCompleted { session_id, .. }
            | ProgressEvent::Substep { session_id, .. } => session_id,
        }
    }
}

/// 进度事件发送端；克隆共享同一通道
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn phase_started(&self, session_id: &str, phase: Phase) {
        self.emit(ProgressEvent::PhaseStarted {
            session_id: session_id.to_string(),
            phase,
        });
    }

    pub fn phase_completed(&self, session_id: &str, phase: Phase, success: bool) {
        self.emit(ProgressEvent::PhaseCompleted {
            session_id: session_id.to_string(),
            phase,
            success,
        });
    }

    pub fn substep(&self, session_id: &str, message: impl Into<String>) {
        self.emit(ProgressEvent::Substep {
            session_id: session_id.to_string(),
            message: message.into(),
        });
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let sink = ProgressSink::default();
        let mut rx = sink.subscribe();
        sink.phase_started("t1", Phase::Routed);
        sink.substep("t1", "orchestrator -> router: route");

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            ProgressEvent::PhaseStarted {
                session_id: "t1".into(),
                phase: Phase::Routed
            }
        );
        assert_eq!(rx.recv().await.unwrap().session_id(), "t1");
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let sink = ProgressSink::new(4);
        sink.phase_completed("t1", Phase::Completed, true);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(ProgressEvent::PhaseCompleted {
            session_id: "t1".into(),
            phase: Phase::ToolsLoaded,
            success: true,
        })
        .unwrap();
        assert_eq!(json["type"], "phase_completed");
        assert_eq!(json["phase"], "tools_loaded");
    }
}
