//! 主控编排：驱动单次请求走完状态机
//!
//! 加载能力 -> 路由 -> 调用能力（单个 / 多个）或直接回答 -> 汇总 -> 完成。
//! 每个阶段受同一请求级截止时间约束；取消令牌触发时中止当前阶段。
//! 致命错误经 Failed -> ErrorHandled 产生一条致歉回复，run 返回时状态必为 Completed 或 ErrorHandled。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::a2a::DelegationTracker;
use crate::agents::GeneralAgent;
use crate::core::state::{OrchestrationState, Phase, StateUpdate, Transition};
use crate::core::{OrchestratorError, ProgressSink, RecoveryEngine, SessionSupervisor};
use crate::memory::{ConversationHistoryStore, Turn};
use crate::routing::Router;
use crate::tools::{CapabilityInvoker, CapabilityRegistry, InvocationBatch};

const ORCHESTRATOR: &str = "orchestrator";
const REGISTRY: &str = "capability_registry";
const ROUTER: &str = "intent_router";
const GENERAL: &str = "general_agent";

/// 编排超时配置
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// 单次请求总预算
    pub request_timeout: Duration,
    /// 请求-响应能力调用的超时（不超过剩余预算）
    pub invoke_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            invoke_timeout: Duration::from_secs(30),
        }
    }
}

/// handle_user_message 的返回：最终回复、更新后的会话历史、可能的错误
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub final_response: String,
    pub updated_history: Vec<Turn>,
    pub error: Option<OrchestratorError>,
    pub phase: Phase,
}

/// 编排器：持有注入的注册表、路由器、调用器、智能体与各类旁路组件
pub struct Orchestrator {
    registry: CapabilityRegistry,
    router: Arc<dyn Router>,
    invoker: CapabilityInvoker,
    general: GeneralAgent,
    history: Arc<dyn ConversationHistoryStore>,
    tracker: Arc<DelegationTracker>,
    progress: ProgressSink,
    supervisor: Arc<SessionSupervisor>,
    recovery: RecoveryEngine,
    options: OrchestratorOptions,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: CapabilityRegistry,
        router: Arc<dyn Router>,
        invoker: CapabilityInvoker,
        general: GeneralAgent,
        history: Arc<dyn ConversationHistoryStore>,
        tracker: Arc<DelegationTracker>,
        progress: ProgressSink,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            registry,
            router,
            invoker,
            general,
            history,
            tracker,
            progress,
            supervisor: Arc::new(SessionSupervisor::new()),
            recovery: RecoveryEngine::new(),
            options,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> Arc<DelegationTracker> {
        self.tracker.clone()
    }

    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    pub fn supervisor(&self) -> Arc<SessionSupervisor> {
        self.supervisor.clone()
    }

    pub fn history_store(&self) -> Arc<dyn ConversationHistoryStore> {
        self.history.clone()
    }

    /// 传输层入口：读取会话历史、运行一次编排、写回本次新增轮次
    pub async fn handle_user_message(&self, session_id: &str, text: &str) -> TurnOutcome {
        let history = self.history.get(session_id).await;
        let request = self.supervisor.begin(session_id).await;
        let state = self.run(session_id, text, history, request.token()).await;
        drop(request);

        self.history
            .append(session_id, state.new_turns().to_vec())
            .await;

        TurnOutcome {
            final_response: state.final_response.clone().unwrap_or_default(),
            updated_history: self.history.get(session_id).await,
            error: state.error.clone(),
            phase: state.current_phase,
        }
    }

    /// 清空会话历史与委派记录
    pub async fn clear_session(&self, session_id: &str) {
        self.history.clear(session_id).await;
        self.tracker.clear_logs_for_thread(session_id).await;
    }

    /// 运行一次编排；返回的状态一定处于终止阶段
    pub async fn run(
        &self,
        session_id: &str,
        query: &str,
        history: Vec<Turn>,
        cancel: CancellationToken,
    ) -> OrchestrationState {
        let mut state = OrchestrationState::new(session_id, query, history);
        let deadline = Instant::now() + self.options.request_timeout;
        tracing::info!(%session_id, "orchestration started");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            r = self.drive(&mut state, deadline) => r,
        };

        match result {
            Ok(()) => {
                tracing::info!(%session_id, phase = %state.current_phase, "orchestration completed");
            }
            Err(err) => self.handle_failure(&mut state, err),
        }
        state
    }

    async fn drive(
        &self,
        state: &mut OrchestrationState,
        deadline: Instant,
    ) -> Result<(), OrchestratorError> {
        let sid = state.session_id.clone();

        // 加载能力
        self.progress.phase_started(&sid, Phase::ToolsLoaded);
        self.tracker
            .log_specific_operation(ORCHESTRATOR, REGISTRY, "load_capabilities", Map::new(), &sid)
            .await;
        let capabilities = self
            .within(deadline, "load_capabilities", self.registry.get())
            .await??;
        self.tracker
            .log_completion(
                REGISTRY,
                ORCHESTRATOR,
                "load_capabilities",
                details(json!({"count": capabilities.len()})),
                &sid,
            )
            .await;
        state.advance(Transition::LoadCapabilities, StateUpdate::none())?;
        self.progress.phase_completed(&sid, Phase::ToolsLoaded, true);
        tracing::info!(session_id = %sid, capabilities = capabilities.len(), "capabilities loaded");

        // 路由
        self.progress.phase_started(&sid, Phase::Routed);
        self.tracker
            .log_delegation(
                ORCHESTRATOR,
                ROUTER,
                "route",
                details(json!({"query": state.user_query, "capabilities": capabilities.len()})),
                &sid,
            )
            .await;
        let decision = self
            .within(
                deadline,
                "route",
                self.router.route(
                    &state.user_query,
                    state.context_before_query(),
                    capabilities.as_slice(),
                ),
            )
            .await?;
        let handler = decision.handler_name();
        self.tracker
            .log_completion(
                ROUTER,
                ORCHESTRATOR,
                "route",
                details(json!({"handler": handler})),
                &sid,
            )
            .await;
        tracing::info!(session_id = %sid, %handler, "request routed");
        let selections = decision.selections().to_vec();
        state.advance(Transition::Route, StateUpdate::routed(decision))?;
        self.progress.phase_completed(&sid, Phase::Routed, true);

        // 分派
        if selections.is_empty() {
            state.advance(Transition::DispatchGeneral, StateUpdate::none())?;
        } else {
            state.advance(Transition::DispatchCapability, StateUpdate::none())?;
            self.progress.phase_started(&sid, Phase::Invoking);
            for sel in &selections {
                self.tracker
                    .log_delegation(
                        ORCHESTRATOR,
                        &sel.descriptor.name,
                        "invoke",
                        details(json!({"parameters": sel.parameters})),
                        &sid,
                    )
                    .await;
            }

            let timeout = self.invoke_timeout(deadline)?;
            let batch = match selections.as_slice() {
                [one] => InvocationBatch::single(
                    self.invoker
                        .invoke_one(&one.descriptor, one.parameters.clone(), timeout)
                        .await,
                ),
                many => {
                    let descriptors: Vec<_> = many.iter().map(|s| s.descriptor.clone()).collect();
                    let parameters: HashMap<_, _> = many
                        .iter()
                        .map(|s| (s.descriptor.name.clone(), s.parameters.clone()))
                        .collect();
                    self.invoker
                        .invoke_many(&descriptors, &parameters, timeout)
                        .await
                }
            };

            for result in &batch.results {
                self.tracker
                    .log_completion(
                        result.capability(),
                        ORCHESTRATOR,
                        "invoke",
                        details(json!({"success": result.is_success()})),
                        &sid,
                    )
                    .await;
            }
            if !batch.is_success() {
                tracing::warn!(
                    session_id = %sid,
                    requested = batch.len(),
                    "all capability invocations failed, summarizing the failures"
                );
            }
            let succeeded = batch.is_success();
            state.advance(Transition::Invoke, StateUpdate::invoked(batch))?;
            self.progress.phase_completed(&sid, Phase::Invoking, succeeded);
        }

        // 汇总
        state.advance(Transition::Summarize, StateUpdate::none())?;
        self.progress.phase_started(&sid, Phase::Summarizing);
        let operation = if state.invocation_results.is_some() {
            "summarize"
        } else {
            "answer"
        };
        self.tracker
            .log_delegation(ORCHESTRATOR, GENERAL, operation, Map::new(), &sid)
            .await;
        let reply = {
            let generation = async {
                match &state.invocation_results {
                    Some(batch) => {
                        self.general
                            .summarize(&state.user_query, &state.conversation_history, batch)
                            .await
                    }
                    None => self.general.answer(&state.conversation_history).await,
                }
            };
            self.within(deadline, operation, generation)
                .await?
                .map_err(|e| OrchestratorError::Summarization(e.to_string()))?
        };
        self.tracker
            .log_completion(GENERAL, ORCHESTRATOR, operation, Map::new(), &sid)
            .await;
        state.advance(Transition::Complete, StateUpdate::responded(reply))?;
        self.progress.phase_completed(&sid, Phase::Summarizing, true);
        self.progress.phase_completed(&sid, Phase::Completed, true);
        Ok(())
    }

    /// Failed -> ErrorHandled：记录错误并以致歉消息结束
    fn handle_failure(&self, state: &mut OrchestrationState, err: OrchestratorError) {
        let sid = state.session_id.clone();
        let failed_at = state.current_phase;
        tracing::error!(session_id = %sid, phase = %failed_at, error = %err, "orchestration failed");
        if state.is_terminal() {
            return;
        }
        self.progress.phase_completed(&sid, failed_at, false);

        if failed_at != Phase::Failed {
            if let Err(e) = state.advance(Transition::Fail, StateUpdate::failed(err.clone())) {
                tracing::warn!(session_id = %sid, error = %e, "could not enter failed phase");
            }
        }
        let action = self.recovery.handle(&err);
        match state.advance(
            Transition::HandleError,
            StateUpdate::responded(action.message()),
        ) {
            Ok(_) => self.progress.phase_completed(&sid, Phase::ErrorHandled, true),
            Err(e) => tracing::warn!(session_id = %sid, error = %e, "error recovery transition rejected"),
        }
    }

    async fn within<F, T>(
        &self,
        deadline: Instant,
        stage: &str,
        fut: F,
    ) -> Result<T, OrchestratorError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| self.deadline_exceeded(stage))
    }

    /// 能力调用超时取配置值与剩余预算中较小者
    fn invoke_timeout(&self, deadline: Instant) -> Result<Duration, OrchestratorError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(self.deadline_exceeded("invoke"));
        }
        Ok(remaining.min(self.options.invoke_timeout))
    }

    fn deadline_exceeded(&self, stage: &str) -> OrchestratorError {
        OrchestratorError::DeadlineExceeded {
            stage: stage.to_string(),
            budget_secs: self.options.request_timeout.as_secs(),
        }
    }
}

fn details(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
