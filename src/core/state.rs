//! 编排状态机：阶段、转换表与单次请求的 OrchestrationState
//!
//! 每个请求独占一个 OrchestrationState；只能通过 advance(transition, update) 改变，
//! 转换先按转换表校验，再把部分更新（StateUpdate）合并进当前状态。
//!
//! ```text
//! Initial -> ToolsLoaded -> Routed -> Invoking -> Invoked ---+
//!                                  \-> DirectGeneral --------+-> Summarizing -> Completed
//! 任一非终止阶段 -> Failed -> ErrorHandled
//! ```

use serde::Serialize;

use crate::core::OrchestratorError;
use crate::memory::{Role, Turn};
use crate::routing::RoutingDecision;
use crate::tools::InvocationBatch;

/// 编排阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initial,
    ToolsLoaded,
    Routed,
    Invoking,
    Invoked,
    DirectGeneral,
    Summarizing,
    Completed,
    Failed,
    ErrorHandled,
}

impl Phase {
    /// 运行结束时只可能停在 Completed 或 ErrorHandled
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::ErrorHandled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initial => "initial",
            Phase::ToolsLoaded => "tools_loaded",
            Phase::Routed => "routed",
            Phase::Invoking => "invoking",
            Phase::Invoked => "invoked",
            Phase::DirectGeneral => "direct_general",
            Phase::Summarizing => "summarizing",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::ErrorHandled => "error_handled",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态转换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    LoadCapabilities,
    Route,
    DispatchCapability,
    DispatchGeneral,
    Invoke,
    Summarize,
    Complete,
    Fail,
    HandleError,
}

impl Transition {
    /// 转换表：返回 `from` 经本转换到达的阶段，不合法时为 None
    pub fn target(self, from: Phase) -> Option<Phase> {
        use Phase::*;
        use Transition::*;
        match (from, self) {
            (Initial, LoadCapabilities) => Some(ToolsLoaded),
            (ToolsLoaded, Route) => Some(Routed),
            (Routed, DispatchCapability) => Some(Invoking),
            (Routed, DispatchGeneral) => Some(DirectGeneral),
            (Invoking, Invoke) => Some(Invoked),
            (Invoked | DirectGeneral, Summarize) => Some(Summarizing),
            (Summarizing, Complete) => Some(Completed),
            (Failed, HandleError) => Some(ErrorHandled),
            (p, Fail) if !p.is_terminal() && p != Failed => Some(Failed),
            _ => None,
        }
    }
}

/// 一次转换产生的部分状态
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub routing_decision: Option<RoutingDecision>,
    pub invocation_results: Option<InvocationBatch>,
    pub final_response: Option<String>,
    pub error: Option<OrchestratorError>,
    /// 追加到本次对话历史的轮次
    pub turns: Vec<Turn>,
}

impl StateUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn routed(decision: RoutingDecision) -> Self {
        Self {
            routing_decision: Some(decision),
            ..Self::default()
        }
    }

    pub fn invoked(batch: InvocationBatch) -> Self {
        Self {
            invocation_results: Some(batch),
            ..Self::default()
        }
    }

    pub fn failed(error: OrchestratorError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// 最终回复同时作为 agent 轮次写入历史
    pub fn responded(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            turns: vec![Turn::agent(text.clone())],
            final_response: Some(text),
            ..Self::default()
        }
    }
}

/// 单次请求的编排状态（请求之间不共享）
#[derive(Debug, Clone)]
pub struct OrchestrationState {
    pub session_id: String,
    pub conversation_history: Vec<Turn>,
    pub user_query: String,
    pub routing_decision: Option<RoutingDecision>,
    pub invocation_results: Option<InvocationBatch>,
    pub final_response: Option<String>,
    pub error: Option<OrchestratorError>,
    pub current_phase: Phase,
    /// 本次请求新增轮次的起始下标
    new_turns_from: usize,
}

impl OrchestrationState {
    /// 以会话历史与本次查询创建；历史末尾已是同一条用户消息时不重复追加
    pub fn new(
        session_id: impl Into<String>,
        user_query: impl Into<String>,
        mut history: Vec<Turn>,
    ) -> Self {
        let user_query = user_query.into();
        let user_turn = Turn::user(user_query.clone());
        let duplicate = history
            .last()
            .map(|t| t.role == Role::User && t.same_as(&user_turn))
            .unwrap_or(false);
        let new_turns_from = history.len();
        if duplicate {
            tracing::debug!("query already at history tail, not appending again");
        } else {
            history.push(user_turn);
        }
        Self {
            session_id: session_id.into(),
            conversation_history: history,
            user_query,
            routing_decision: None,
            invocation_results: None,
            final_response: None,
            error: None,
            current_phase: Phase::Initial,
            new_turns_from,
        }
    }

    /// 执行一次转换并合并部分状态；非法转换返回 IllegalTransition 且状态不变
    pub fn advance(
        &mut self,
        transition: Transition,
        update: StateUpdate,
    ) -> Result<Phase, OrchestratorError> {
        let from = self.current_phase;
        let to = transition.target(from).ok_or(OrchestratorError::IllegalTransition {
            from,
            to: illegal_target(transition),
        })?;

        if let Some(decision) = update.routing_decision {
            self.routing_decision = Some(decision);
        }
        if let Some(batch) = update.invocation_results {
            self.invocation_results = Some(batch);
        }
        if let Some(text) = update.final_response {
            self.final_response = Some(text);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.conversation_history.extend(update.turns);
        self.current_phase = to;

        tracing::debug!(session_id = %self.session_id, %from, %to, "phase transition");
        Ok(to)
    }

    pub fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }

    /// 本次用户消息之前的历史（路由 prompt 会单独附上本次查询）
    pub fn context_before_query(&self) -> &[Turn] {
        let history = self.conversation_history.as_slice();
        match history.last() {
            Some(last) if last.role == Role::User && last.content == self.user_query => {
                &history[..history.len() - 1]
            }
            _ => history,
        }
    }

    /// 本次请求产生的轮次（用户消息与最终回复），完成后写入会话历史
    pub fn new_turns(&self) -> &[Turn] {
        &self.conversation_history[self.new_turns_from.min(self.conversation_history.len())..]
    }
}

/// 非法转换的错误信息中，用转换通常到达的阶段描述意图
fn illegal_target(transition: Transition) -> Phase {
    match transition {
        Transition::LoadCapabilities => Phase::ToolsLoaded,
        Transition::Route => Phase::Routed,
        Transition::DispatchCapability => Phase::Invoking,
        Transition::DispatchGeneral => Phase::DirectGeneral,
        Transition::Invoke => Phase::Invoked,
        Transition::Summarize => Phase::Summarizing,
        Transition::Complete => Phase::Completed,
        Transition::Fail => Phase::Failed,
        Transition::HandleError => Phase::ErrorHandled,
    }
}
